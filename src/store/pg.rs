//! Postgres store. Plain runtime-bound queries; the overlap and occupancy
//! predicates live in SQL so the index on (slot_id, start_time, end_time)
//! does the work.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, ParkingLot, ParkingSlot, Role, Session, TimeRange, User};

use super::{Store, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> PgStore {
        PgStore { pool }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

fn map_unique(err: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Duplicate(what);
        }
    }
    StoreError::Database(err)
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> Result<User, StoreError> {
        let role = Role::parse(&self.role).ok_or(StoreError::Corrupt("user role"))?;
        Ok(User {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    slot_id: Uuid,
    lot_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self) -> Result<Booking, StoreError> {
        let status =
            BookingStatus::parse(&self.status).ok_or(StoreError::Corrupt("booking status"))?;
        Ok(Booking {
            id: self.id,
            user_id: self.user_id,
            slot_id: self.slot_id,
            lot_id: self.lot_id,
            start_time: self.start_time,
            end_time: self.end_time,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(BookingRow::into_booking).collect()
}

const USER_COLUMNS: &str =
    "id, first_name, last_name, username, email, password_hash, role, created_at, updated_at";
const BOOKING_COLUMNS: &str =
    "id, user_id, slot_id, lot_id, start_time, end_time, status, created_at, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, first_name, last_name, username, email, password_hash, role, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "user"))?;
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET role = $1, updated_at = $2 WHERE id = $3")
            .bind(role.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (token_digest, user_id, expires_at, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token_digest)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session_by_digest(&self, digest: &str) -> Result<Option<Session>, StoreError> {
        #[derive(FromRow)]
        struct SessionRow {
            token_digest: String,
            user_id: Uuid,
            expires_at: DateTime<Utc>,
            created_at: DateTime<Utc>,
        }
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT token_digest, user_id, expires_at, created_at FROM sessions WHERE token_digest = $1",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Session {
            token_digest: r.token_digest,
            user_id: r.user_id,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }))
    }

    async fn delete_session(&self, digest: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE token_digest = $1")
            .bind(digest)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_lot(&self, lot: &ParkingLot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO parking_lots (id, admin_id, name, address, latitude, longitude, total_slots, available_slots, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(lot.id)
        .bind(lot.admin_id)
        .bind(&lot.name)
        .bind(&lot.address)
        .bind(lot.latitude)
        .bind(lot.longitude)
        .bind(lot.total_slots)
        .bind(lot.available_slots)
        .bind(lot.created_at)
        .bind(lot.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lot_by_id(&self, id: Uuid) -> Result<Option<ParkingLot>, StoreError> {
        let lot = sqlx::query_as::<_, ParkingLot>(
            "SELECT id, admin_id, name, address, latitude, longitude, total_slots, available_slots, created_at, updated_at
             FROM parking_lots WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lot)
    }

    async fn all_lots(&self) -> Result<Vec<ParkingLot>, StoreError> {
        let lots = sqlx::query_as::<_, ParkingLot>(
            "SELECT id, admin_id, name, address, latitude, longitude, total_slots, available_slots, created_at, updated_at
             FROM parking_lots ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(lots)
    }

    async fn update_lot_counts(
        &self,
        lot_id: Uuid,
        total: i32,
        available: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE parking_lots SET total_slots = $1, available_slots = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(total)
        .bind(available)
        .bind(updated_at)
        .bind(lot_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_slot(&self, slot: &ParkingSlot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO parking_slots (id, lot_id, label, is_available, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(slot.id)
        .bind(slot.lot_id)
        .bind(&slot.label)
        .bind(slot.is_available)
        .bind(slot.created_at)
        .bind(slot.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "slot label"))?;
        Ok(())
    }

    async fn slot_by_id(&self, id: Uuid) -> Result<Option<ParkingSlot>, StoreError> {
        let slot = sqlx::query_as::<_, ParkingSlot>(
            "SELECT id, lot_id, label, is_available, created_at, updated_at
             FROM parking_slots WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(slot)
    }

    async fn slots_by_lot(&self, lot_id: Uuid) -> Result<Vec<ParkingSlot>, StoreError> {
        let slots = sqlx::query_as::<_, ParkingSlot>(
            "SELECT id, lot_id, label, is_available, created_at, updated_at
             FROM parking_slots WHERE lot_id = $1 ORDER BY label",
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(slots)
    }

    async fn update_slot(&self, slot: &ParkingSlot) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE parking_slots SET label = $1, is_available = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(&slot.label)
        .bind(slot.is_available)
        .bind(slot.updated_at)
        .bind(slot.id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "slot label"))?;
        Ok(())
    }

    async fn count_slots(&self, lot_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM parking_slots WHERE lot_id = $1",
        )
        .bind(lot_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bookings (id, user_id, slot_id, lot_id, start_time, end_time, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.slot_id)
        .bind(booking.lot_id)
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn booking_by_id(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BookingRow::into_booking).transpose()
    }

    async fn bookings_by_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        into_bookings(rows)
    }

    async fn bookings_by_slot(&self, slot_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE slot_id = $1 ORDER BY created_at"
        ))
        .bind(slot_id)
        .fetch_all(&self.pool)
        .await?;
        into_bookings(rows)
    }

    async fn bookings_by_status(
        &self,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = $1 ORDER BY created_at"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY created_at"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        into_bookings(rows)
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "UPDATE bookings SET status = $1, updated_at = $2
             WHERE id = $3 AND status = $4
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(to.as_str())
        .bind(updated_at)
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(BookingRow::into_booking).transpose()
    }

    async fn has_active_overlap(
        &self,
        slot_id: Uuid,
        range: TimeRange,
    ) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                 SELECT 1 FROM bookings
                 WHERE slot_id = $1 AND status = 'BOOKED'
                   AND start_time < $3 AND end_time > $2
             )",
        )
        .bind(slot_id)
        .bind(range.start())
        .bind(range.end())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn busy_slots(
        &self,
        lot_id: Uuid,
        range: TimeRange,
    ) -> Result<HashSet<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT slot_id FROM bookings
             WHERE lot_id = $1 AND status = 'BOOKED'
               AND start_time < $3 AND end_time > $2",
        )
        .bind(lot_id)
        .bind(range.start())
        .bind(range.end())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn count_occupied_slots(
        &self,
        lot_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT slot_id) FROM bookings
             WHERE lot_id = $1 AND status = 'BOOKED'
               AND start_time <= $2 AND end_time > $2",
        )
        .bind(lot_id)
        .bind(as_of)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
