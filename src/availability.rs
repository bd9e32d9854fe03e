//! Answers "is this slot free for that window?" and "which slots of a lot
//! are free?". Overlap is strict half-open, so back-to-back bookings never
//! collide.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Error;
use crate::models::{ParkingSlot, TimeRange};
use crate::store::Store;

#[derive(Clone)]
pub struct AvailabilityIndex {
    store: Arc<dyn Store>,
}

impl AvailabilityIndex {
    pub fn new(store: Arc<dyn Store>) -> AvailabilityIndex {
        AvailabilityIndex { store }
    }

    /// True iff a BOOKED booking on the slot shares at least one instant
    /// with `range`. Interval validity is guaranteed by `TimeRange`.
    pub async fn has_overlap(&self, slot_id: Uuid, range: TimeRange) -> Result<bool, Error> {
        Ok(self.store.has_active_overlap(slot_id, range).await?)
    }

    /// Every slot of the lot without an active overlap in `range`. A lot
    /// without slots (or an unknown lot) yields an empty list, not an error.
    pub async fn free_slots(
        &self,
        lot_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<ParkingSlot>, Error> {
        let slots = self.store.slots_by_lot(lot_id).await?;
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let busy = self.store.busy_slots(lot_id, range).await?;
        Ok(slots.into_iter().filter(|s| !busy.contains(&s.id)).collect())
    }
}
