//! Derives a lot's `{total, available}` counters from the booking state at a
//! given instant. The counters are a recompute-on-demand snapshot; the
//! admission path never touches them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LotOccupancy {
    pub total: i64,
    pub available: i64,
}

#[derive(Clone)]
pub struct OccupancyAggregator {
    store: Arc<dyn Store>,
}

impl OccupancyAggregator {
    pub fn new(store: Arc<dyn Store>) -> OccupancyAggregator {
        OccupancyAggregator { store }
    }

    /// Occupancy as of `as_of`: a slot counts as occupied when a BOOKED
    /// booking satisfies `start <= as_of < end`. `available` is clamped at
    /// zero should stale data ever report more occupied slots than exist.
    pub async fn recompute(
        &self,
        lot_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<LotOccupancy, Error> {
        self.store
            .lot_by_id(lot_id)
            .await?
            .ok_or_else(|| Error::not_found("parking lot"))?;
        let total = self.store.count_slots(lot_id).await?;
        let occupied = self.store.count_occupied_slots(lot_id, as_of).await?;
        Ok(LotOccupancy {
            total,
            available: (total - occupied).max(0),
        })
    }

    /// Recompute at `now` and persist the snapshot onto the lot row.
    pub async fn refresh(&self, lot_id: Uuid) -> Result<LotOccupancy, Error> {
        let now = Utc::now();
        let occupancy = self.recompute(lot_id, now).await?;
        self.store
            .update_lot_counts(lot_id, occupancy.total as i32, occupancy.available as i32, now)
            .await?;
        Ok(occupancy)
    }
}
