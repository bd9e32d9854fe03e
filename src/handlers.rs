//! HTTP surface: request/response DTOs and the actix-web route handlers.
//! Handlers translate between the wire and the core components; all booking
//! decisions live in the admission controller.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::auth::{self, AuthService, AuthUser};
use crate::availability::AvailabilityIndex;
use crate::error::Error;
use crate::models::{BookingStatus, ParkingLot, ParkingSlot, TimeRange, User};
use crate::occupancy::OccupancyAggregator;
use crate::store::{Store, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: AuthService,
    pub admission: AdmissionController,
    pub availability: AvailabilityIndex,
    pub occupancy: OccupancyAggregator,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, session_ttl_hours: i64) -> AppState {
        AppState {
            auth: AuthService::new(store.clone(), session_ttl_hours),
            admission: AdmissionController::new(store.clone()),
            availability: AvailabilityIndex::new(store.clone()),
            occupancy: OccupancyAggregator::new(store.clone()),
            store,
        }
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/signup", web::post().to(signup))
            .route("/login", web::post().to(login))
            .route("/me", web::get().to(me))
            .route("/logout", web::post().to(logout)),
    )
    .service(
        web::scope("/lots")
            .route("", web::post().to(create_lot))
            .route("", web::get().to(list_lots))
            .route("/{lot_id}", web::get().to(get_lot))
            .route("/{lot_id}/slots", web::get().to(lot_slots))
            .route("/{lot_id}/slots", web::post().to(create_slot))
            .route("/{lot_id}/available-slots", web::get().to(available_slots))
            .route("/{lot_id}/occupancy", web::get().to(lot_occupancy)),
    )
    .service(
        web::scope("/slots")
            .route("/{slot_id}", web::get().to(get_slot))
            .route("/{slot_id}", web::put().to(update_slot))
            .route("/{slot_id}/bookings", web::get().to(slot_bookings)),
    )
    .service(
        web::scope("/bookings")
            .route("", web::post().to(create_booking))
            .route("", web::get().to(list_bookings))
            .route("/my", web::get().to(my_bookings))
            .route("/{booking_id}", web::get().to(get_booking))
            .route("/{booking_id}", web::delete().to(cancel_booking))
            .route("/{booking_id}/status", web::patch().to(update_booking_status)),
    );
}

// ---- auth ----

#[derive(Deserialize)]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub role: crate::models::Role,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> UserResponse {
        UserResponse {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            email: user.email,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

async fn signup(
    state: web::Data<AppState>,
    body: web::Json<SignupRequest>,
) -> Result<HttpResponse, Error> {
    let user = state
        .auth
        .register(
            &body.first_name,
            &body.last_name,
            &body.username,
            &body.email,
            &body.password,
        )
        .await?;
    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, Error> {
    let token = state.auth.login(&body.email, &body.password).await?;
    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token: token,
        token_type: "bearer",
    }))
}

async fn me(user: AuthUser) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(UserResponse::from(user.user)))
}

async fn logout(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let token = auth::bearer_token(&req)?;
    state.auth.logout(&token).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---- parking lots ----

#[derive(Deserialize)]
pub struct CreateLotRequest {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

async fn create_lot(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<CreateLotRequest>,
) -> Result<HttpResponse, Error> {
    user.require_admin()?;
    if body.name.trim().is_empty() || body.address.trim().is_empty() {
        return Err(Error::validation("name and address are required"));
    }
    let now = Utc::now();
    let lot = ParkingLot {
        id: Uuid::new_v4(),
        admin_id: user.id(),
        name: body.name.trim().to_string(),
        address: body.address.trim().to_string(),
        latitude: body.latitude,
        longitude: body.longitude,
        total_slots: 0,
        available_slots: 0,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_lot(&lot).await?;
    Ok(HttpResponse::Created().json(lot))
}

async fn list_lots(state: web::Data<AppState>, _user: AuthUser) -> Result<HttpResponse, Error> {
    let lots = state.store.all_lots().await?;
    Ok(HttpResponse::Ok().json(lots))
}

async fn get_lot(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let lot = state
        .store
        .lot_by_id(path.into_inner())
        .await?
        .ok_or_else(|| Error::not_found("parking lot"))?;
    Ok(HttpResponse::Ok().json(lot))
}

async fn lot_slots(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let slots = state
        .store
        .slots_by_lot(path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(slots))
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

async fn available_slots(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
    query: web::Query<AvailabilityQuery>,
) -> Result<HttpResponse, Error> {
    let range = TimeRange::new(query.start_time, query.end_time)?;
    let free = state.availability.free_slots(path.into_inner(), range).await?;
    Ok(HttpResponse::Ok().json(free))
}

async fn lot_occupancy(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let occupancy = state.occupancy.refresh(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(occupancy))
}

// ---- parking slots ----

#[derive(Deserialize)]
pub struct CreateSlotRequest {
    pub label: String,
}

async fn create_slot(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<CreateSlotRequest>,
) -> Result<HttpResponse, Error> {
    user.require_admin()?;
    let lot_id = path.into_inner();
    if body.label.trim().is_empty() {
        return Err(Error::validation("slot label is required"));
    }
    state
        .store
        .lot_by_id(lot_id)
        .await?
        .ok_or_else(|| Error::not_found("parking lot"))?;

    let now = Utc::now();
    let slot = ParkingSlot {
        id: Uuid::new_v4(),
        lot_id,
        label: body.label.trim().to_string(),
        is_available: true,
        created_at: now,
        updated_at: now,
    };
    match state.store.insert_slot(&slot).await {
        Ok(()) => {}
        Err(StoreError::Duplicate(_)) => {
            return Err(Error::validation("slot label already exists in this parking lot"))
        }
        Err(e) => return Err(e.into()),
    }
    // keep the lot's snapshot counters in step with its slot count
    state.occupancy.refresh(lot_id).await?;
    Ok(HttpResponse::Created().json(slot))
}

async fn get_slot(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let slot = state
        .store
        .slot_by_id(path.into_inner())
        .await?
        .ok_or_else(|| Error::not_found("parking slot"))?;
    Ok(HttpResponse::Ok().json(slot))
}

#[derive(Deserialize)]
pub struct UpdateSlotRequest {
    pub label: Option<String>,
    pub is_available: Option<bool>,
}

async fn update_slot(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<UpdateSlotRequest>,
) -> Result<HttpResponse, Error> {
    user.require_admin()?;
    let mut slot = state
        .store
        .slot_by_id(path.into_inner())
        .await?
        .ok_or_else(|| Error::not_found("parking slot"))?;

    if let Some(label) = &body.label {
        if label.trim().is_empty() {
            return Err(Error::validation("slot label is required"));
        }
        slot.label = label.trim().to_string();
    }
    if let Some(is_available) = body.is_available {
        slot.is_available = is_available;
    }
    slot.updated_at = Utc::now();

    match state.store.update_slot(&slot).await {
        Ok(()) => Ok(HttpResponse::Ok().json(slot)),
        Err(StoreError::Duplicate(_)) => {
            Err(Error::validation("slot label already exists in this parking lot"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn slot_bookings(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    user.require_admin()?;
    let bookings = state
        .store
        .bookings_by_slot(path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(bookings))
}

// ---- bookings ----

#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub slot_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

async fn create_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<CreateBookingRequest>,
) -> Result<HttpResponse, Error> {
    let booking = state
        .admission
        .create_booking(body.slot_id, user.id(), body.start_time, body.end_time)
        .await?;
    Ok(HttpResponse::Created().json(booking))
}

async fn my_bookings(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse, Error> {
    let bookings = state
        .store
        .bookings_by_user(user.id())
        .await?;
    Ok(HttpResponse::Ok().json(bookings))
}

async fn get_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let booking = state
        .store
        .booking_by_id(path.into_inner())
        .await?
        .ok_or_else(|| Error::not_found("booking"))?;
    if booking.user_id != user.id() && !user.is_admin() {
        return Err(Error::permission("not allowed to view this booking"));
    }
    Ok(HttpResponse::Ok().json(booking))
}

async fn cancel_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let booking_id = path.into_inner();
    let booking = state
        .store
        .booking_by_id(booking_id)
        .await?
        .ok_or_else(|| Error::not_found("booking"))?;

    // owners go through the strict-ownership path; admins cancelling someone
    // else's booking use the administrative transition
    let cancelled = if user.is_admin() && booking.user_id != user.id() {
        state
            .admission
            .transition_status(booking_id, BookingStatus::Cancelled)
            .await?
    } else {
        state.admission.cancel_booking(booking_id, user.id()).await?
    };
    Ok(HttpResponse::Ok().json(cancelled))
}

#[derive(Deserialize)]
pub struct BookingListQuery {
    pub status: Option<BookingStatus>,
}

async fn list_bookings(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<BookingListQuery>,
) -> Result<HttpResponse, Error> {
    user.require_admin()?;
    let bookings = state
        .store
        .bookings_by_status(query.status)
        .await?;
    Ok(HttpResponse::Ok().json(bookings))
}

#[derive(Deserialize)]
pub struct StatusUpdateRequest {
    pub status: BookingStatus,
}

async fn update_booking_status(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<StatusUpdateRequest>,
) -> Result<HttpResponse, Error> {
    user.require_admin()?;
    let booking = state
        .admission
        .transition_status(path.into_inner(), body.status)
        .await?;
    Ok(HttpResponse::Ok().json(booking))
}
