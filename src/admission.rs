//! The single authority for creating and cancelling bookings. Admission for
//! one slot is fully serialized: the overlap check and the insert happen
//! inside a per-slot exclusive section, so no interleaving of two admissions
//! for the same slot can ever produce overlapping BOOKED bookings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::availability::AvailabilityIndex;
use crate::error::Error;
use crate::models::{Booking, BookingStatus, TimeRange};
use crate::store::Store;

/// Registry of per-slot admission locks. Entries for distinct slots are
/// distinct mutexes, so admissions on different slots never contend; the
/// outer map lock is only held long enough to hand out a handle.
struct SlotLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SlotLocks {
    fn new() -> SlotLocks {
        SlotLocks {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn for_slot(&self, slot_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("slot lock registry poisoned");
        locks
            .entry(slot_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn Store>,
    index: AvailabilityIndex,
    locks: Arc<SlotLocks>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn Store>) -> AdmissionController {
        let index = AvailabilityIndex::new(store.clone());
        AdmissionController {
            store,
            index,
            locks: Arc::new(SlotLocks::new()),
        }
    }

    /// Admit a booking for `[start, end)` on the slot, or reject it.
    ///
    /// The interval is validated before the slot lock is touched; existence
    /// and overlap are then decided under the lock, and the insert commits
    /// before the lock is released. Any error path releases the lock via the
    /// guard and leaves no partial booking behind.
    pub async fn create_booking(
        &self,
        slot_id: Uuid,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Booking, Error> {
        let range = TimeRange::new(start, end)?;

        let lock = self.locks.for_slot(slot_id);
        let _guard = lock.lock().await;

        let slot = self
            .store
            .slot_by_id(slot_id)
            .await?
            .ok_or_else(|| Error::not_found("parking slot"))?;

        if self.index.has_overlap(slot_id, range).await? {
            return Err(Error::conflict("slot already booked for this time"));
        }

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            user_id,
            slot_id,
            lot_id: slot.lot_id,
            start_time: range.start(),
            end_time: range.end(),
            status: BookingStatus::Booked,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_booking(&booking).await?;
        info!(
            "admitted booking {} on slot {} for [{}, {})",
            booking.id, slot_id, booking.start_time, booking.end_time
        );
        Ok(booking)
    }

    /// Owner-initiated cancellation. No slot lock: cancelling only removes a
    /// constraint. The status flip is a compare-and-swap, so a concurrent
    /// double-cancel applies exactly once and the loser gets an error.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        requesting_user: Uuid,
    ) -> Result<Booking, Error> {
        let booking = self
            .store
            .booking_by_id(booking_id)
            .await?
            .ok_or_else(|| Error::not_found("booking"))?;
        if booking.user_id != requesting_user {
            return Err(Error::permission("not allowed to cancel this booking"));
        }
        if booking.status != BookingStatus::Booked {
            return Err(Error::validation("only active bookings can be cancelled"));
        }
        self.store
            .update_booking_status(
                booking_id,
                BookingStatus::Booked,
                BookingStatus::Cancelled,
                Utc::now(),
            )
            .await?
            .ok_or_else(|| Error::validation("only active bookings can be cancelled"))
    }

    /// Administrative transition out of BOOKED (to CANCELLED or COMPLETED).
    /// CANCELLED and COMPLETED are terminal; nothing leaves them.
    pub async fn transition_status(
        &self,
        booking_id: Uuid,
        to: BookingStatus,
    ) -> Result<Booking, Error> {
        if to == BookingStatus::Booked {
            return Err(Error::validation("bookings cannot return to the BOOKED state"));
        }
        let booking = self
            .store
            .booking_by_id(booking_id)
            .await?
            .ok_or_else(|| Error::not_found("booking"))?;
        if booking.status != BookingStatus::Booked {
            return Err(Error::validation("only active bookings can change status"));
        }
        self.store
            .update_booking_status(booking_id, BookingStatus::Booked, to, Utc::now())
            .await?
            .ok_or_else(|| Error::validation("only active bookings can change status"))
    }
}
