//! Identity plumbing: salted password digests, opaque bearer tokens and the
//! request extractor that resolves them. The booking core never sees any of
//! this; it only receives the resolved user id and role.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Error;
use crate::handlers::AppState;
use crate::models::{Role, Session, User};
use crate::store::{Store, StoreError};

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// `salt$digest`, digest = sha256(salt || password).
pub fn hash_password(password: &str) -> String {
    let salt = random_hex(16);
    let digest = sha256_hex(&format!("{salt}{password}"));
    format!("{salt}${digest}")
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => sha256_hex(&format!("{salt}{password}")) == digest,
        None => false,
    }
}

fn new_token() -> String {
    random_hex(32)
}

fn token_digest(token: &str) -> String {
    sha256_hex(token)
}

pub fn bearer_token(req: &HttpRequest) -> Result<String, Error> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::unauthorized("missing bearer token"))?;
    match header.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(Error::unauthorized("missing bearer token")),
    }
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, session_ttl_hours: i64) -> AuthService {
        AuthService {
            store,
            session_ttl: Duration::hours(session_ttl_hours),
        }
    }

    pub async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, Error> {
        if username.trim().is_empty() || email.trim().is_empty() || !email.contains('@') {
            return Err(Error::validation("a username and a valid email are required"));
        }
        if password.len() < 8 {
            return Err(Error::validation("password must be at least 8 characters"));
        }
        if self.store.user_by_email(email).await?.is_some() {
            return Err(Error::conflict("email already registered"));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password_hash: hash_password(password),
            role: Role::User,
            created_at: now,
            updated_at: now,
        };
        match self.store.insert_user(&user).await {
            Ok(()) => Ok(user),
            Err(StoreError::Duplicate(_)) => Err(Error::conflict("username already taken")),
            Err(e) => Err(e.into()),
        }
    }

    /// Issues an opaque bearer token; only its digest is persisted.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, Error> {
        let user = self
            .store
            .user_by_email(email)
            .await?
            .ok_or_else(|| Error::unauthorized("invalid email or password"))?;
        if !verify_password(password, &user.password_hash) {
            return Err(Error::unauthorized("invalid email or password"));
        }
        let token = new_token();
        let now = Utc::now();
        let session = Session {
            token_digest: token_digest(&token),
            user_id: user.id,
            expires_at: now + self.session_ttl,
            created_at: now,
        };
        self.store.insert_session(&session).await?;
        info!("user {} logged in", user.username);
        Ok(token)
    }

    pub async fn resolve(&self, token: &str) -> Result<User, Error> {
        let digest = token_digest(token);
        let session = self
            .store
            .session_by_digest(&digest)
            .await?
            .ok_or_else(|| Error::unauthorized("invalid or expired token"))?;
        if session.expires_at <= Utc::now() {
            self.store.delete_session(&digest).await?;
            return Err(Error::unauthorized("invalid or expired token"));
        }
        self.store
            .user_by_id(session.user_id)
            .await?
            .ok_or_else(|| Error::not_found("user"))
    }

    pub async fn logout(&self, token: &str) -> Result<(), Error> {
        self.store.delete_session(&token_digest(token)).await?;
        Ok(())
    }

    /// Creates the seed administrator, or promotes the account if it already
    /// exists with the USER role.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<(), Error> {
        if let Some(existing) = self.store.user_by_email(email).await? {
            if existing.role != Role::Admin {
                self.store.update_user_role(existing.id, Role::Admin).await?;
                info!("promoted {} to administrator", existing.username);
            }
            return Ok(());
        }
        let username = email.split('@').next().unwrap_or(email);
        let user = self
            .register("Admin", "", username, email, password)
            .await?;
        self.store.update_user_role(user.id, Role::Admin).await?;
        info!("seeded administrator account {}", user.username);
        Ok(())
    }
}

/// Resolved caller identity. Handlers take this as an extractor argument;
/// requests without a valid token never reach them.
pub struct AuthUser {
    pub user: User,
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), Error> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::permission("admin access required"))
        }
    }
}

impl FromRequest for AuthUser {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<AuthUser, Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let state = req
                .app_data::<web::Data<AppState>>()
                .ok_or_else(|| Error::internal("application state not configured"))?
                .clone();
            let token = bearer_token(&req)?;
            let user = state.auth.resolve(&token).await?;
            Ok(AuthUser { user })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> AuthService {
        AuthService::new(Arc::new(MemoryStore::new()), 24)
    }

    #[test]
    fn password_hash_verifies_and_salts_differ() {
        let a = hash_password("correct horse");
        let b = hash_password("correct horse");
        assert_ne!(a, b);
        assert!(verify_password("correct horse", &a));
        assert!(verify_password("correct horse", &b));
        assert!(!verify_password("wrong horse", &a));
    }

    #[tokio::test]
    async fn register_login_resolve_round_trip() {
        let auth = service();
        let user = auth
            .register("Ada", "Lovelace", "ada", "ada@example.com", "difference engine")
            .await
            .unwrap();
        assert_eq!(user.role, Role::User);

        let token = auth.login("ada@example.com", "difference engine").await.unwrap();
        let resolved = auth.resolve(&token).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let auth = service();
        auth.register("Ada", "Lovelace", "ada", "ada@example.com", "difference engine")
            .await
            .unwrap();
        let err = auth.login("ada@example.com", "analytical").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        let err = auth.login("nobody@example.com", "difference engine").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn logout_revokes_the_token() {
        let auth = service();
        auth.register("Ada", "Lovelace", "ada", "ada@example.com", "difference engine")
            .await
            .unwrap();
        let token = auth.login("ada@example.com", "difference engine").await.unwrap();
        auth.logout(&token).await.unwrap();
        let err = auth.resolve(&token).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let auth = service();
        auth.register("Ada", "Lovelace", "ada", "ada@example.com", "difference engine")
            .await
            .unwrap();
        let err = auth
            .register("Other", "Person", "other", "ada@example.com", "another pass")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = auth
            .register("Other", "Person", "ada", "other@example.com", "another pass")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn ensure_admin_creates_and_promotes() {
        let auth = service();
        auth.ensure_admin("ops@example.com", "super secret").await.unwrap();
        let token = auth.login("ops@example.com", "super secret").await.unwrap();
        let user = auth.resolve(&token).await.unwrap();
        assert_eq!(user.role, Role::Admin);

        // idempotent on the second call
        auth.ensure_admin("ops@example.com", "super secret").await.unwrap();
        let again = auth.resolve(&token).await.unwrap();
        assert_eq!(again.role, Role::Admin);
    }
}
