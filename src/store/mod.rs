//! Persistence seam for the booking core: plain CRUD plus the time-window
//! scans and guarded updates the admission path needs.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, ParkingLot, ParkingSlot, Role, Session, TimeRange, User};

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error("corrupt row: bad {0}")]
    Corrupt(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- users ----
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn update_user_role(&self, id: Uuid, role: Role) -> Result<(), StoreError>;

    // ---- sessions ----
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn session_by_digest(&self, digest: &str) -> Result<Option<Session>, StoreError>;
    async fn delete_session(&self, digest: &str) -> Result<(), StoreError>;

    // ---- parking lots ----
    async fn insert_lot(&self, lot: &ParkingLot) -> Result<(), StoreError>;
    async fn lot_by_id(&self, id: Uuid) -> Result<Option<ParkingLot>, StoreError>;
    async fn all_lots(&self) -> Result<Vec<ParkingLot>, StoreError>;
    async fn update_lot_counts(
        &self,
        lot_id: Uuid,
        total: i32,
        available: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ---- parking slots ----
    async fn insert_slot(&self, slot: &ParkingSlot) -> Result<(), StoreError>;
    async fn slot_by_id(&self, id: Uuid) -> Result<Option<ParkingSlot>, StoreError>;
    async fn slots_by_lot(&self, lot_id: Uuid) -> Result<Vec<ParkingSlot>, StoreError>;
    async fn update_slot(&self, slot: &ParkingSlot) -> Result<(), StoreError>;
    async fn count_slots(&self, lot_id: Uuid) -> Result<i64, StoreError>;

    // ---- bookings ----
    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError>;
    async fn booking_by_id(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;
    async fn bookings_by_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError>;
    async fn bookings_by_slot(&self, slot_id: Uuid) -> Result<Vec<Booking>, StoreError>;
    async fn bookings_by_status(
        &self,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Compare-and-swap status transition. Returns the updated booking, or
    /// `None` when the stored status no longer matches `from` (e.g. a
    /// concurrent cancel won the race).
    async fn update_booking_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError>;

    /// Any BOOKED booking on the slot overlapping `range`, half-open.
    async fn has_active_overlap(&self, slot_id: Uuid, range: TimeRange)
        -> Result<bool, StoreError>;

    /// Slots of the lot with at least one BOOKED booking overlapping `range`.
    async fn busy_slots(&self, lot_id: Uuid, range: TimeRange)
        -> Result<HashSet<Uuid>, StoreError>;

    /// Distinct slots of the lot with a BOOKED booking covering `as_of`
    /// (start-inclusive, end-exclusive).
    async fn count_occupied_slots(
        &self,
        lot_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<i64, StoreError>;
}
