//! In-memory store used by the test suite and single-process deployments.
//! One `RwLock` over the whole state keeps every read a consistent snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, ParkingLot, ParkingSlot, Role, Session, TimeRange, User};

use super::{Store, StoreError};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    lots: HashMap<Uuid, ParkingLot>,
    slots: HashMap<Uuid, ParkingSlot>,
    bookings: HashMap<Uuid, Booking>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().expect("store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().expect("store lock poisoned")
    }
}

fn booking_covers(booking: &Booking, at: DateTime<Utc>) -> bool {
    booking.start_time <= at && at < booking.end_time
}

fn booking_overlaps(booking: &Booking, range: &TimeRange) -> bool {
    booking.start_time < range.end() && range.start() < booking.end_time
}

fn sorted_by_creation(mut bookings: Vec<Booking>) -> Vec<Booking> {
    bookings.sort_by_key(|b| b.created_at);
    bookings
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.write();
        if state
            .users
            .values()
            .any(|u| u.email == user.email || u.username == user.username)
        {
            return Err(StoreError::Duplicate("user"));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> Result<(), StoreError> {
        if let Some(user) = self.write().users.get_mut(&id) {
            user.role = role;
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.write()
            .sessions
            .insert(session.token_digest.clone(), session.clone());
        Ok(())
    }

    async fn session_by_digest(&self, digest: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.read().sessions.get(digest).cloned())
    }

    async fn delete_session(&self, digest: &str) -> Result<(), StoreError> {
        self.write().sessions.remove(digest);
        Ok(())
    }

    async fn insert_lot(&self, lot: &ParkingLot) -> Result<(), StoreError> {
        self.write().lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn lot_by_id(&self, id: Uuid) -> Result<Option<ParkingLot>, StoreError> {
        Ok(self.read().lots.get(&id).cloned())
    }

    async fn all_lots(&self) -> Result<Vec<ParkingLot>, StoreError> {
        let mut lots: Vec<ParkingLot> = self.read().lots.values().cloned().collect();
        lots.sort_by_key(|l| l.created_at);
        Ok(lots)
    }

    async fn update_lot_counts(
        &self,
        lot_id: Uuid,
        total: i32,
        available: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(lot) = self.write().lots.get_mut(&lot_id) {
            lot.total_slots = total;
            lot.available_slots = available;
            lot.updated_at = updated_at;
        }
        Ok(())
    }

    async fn insert_slot(&self, slot: &ParkingSlot) -> Result<(), StoreError> {
        let mut state = self.write();
        if state
            .slots
            .values()
            .any(|s| s.lot_id == slot.lot_id && s.label == slot.label)
        {
            return Err(StoreError::Duplicate("slot label"));
        }
        state.slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn slot_by_id(&self, id: Uuid) -> Result<Option<ParkingSlot>, StoreError> {
        Ok(self.read().slots.get(&id).cloned())
    }

    async fn slots_by_lot(&self, lot_id: Uuid) -> Result<Vec<ParkingSlot>, StoreError> {
        let mut slots: Vec<ParkingSlot> = self
            .read()
            .slots
            .values()
            .filter(|s| s.lot_id == lot_id)
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(slots)
    }

    async fn update_slot(&self, slot: &ParkingSlot) -> Result<(), StoreError> {
        let mut state = self.write();
        if state
            .slots
            .values()
            .any(|s| s.id != slot.id && s.lot_id == slot.lot_id && s.label == slot.label)
        {
            return Err(StoreError::Duplicate("slot label"));
        }
        state.slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn count_slots(&self, lot_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.read().slots.values().filter(|s| s.lot_id == lot_id).count() as i64)
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        self.write().bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn booking_by_id(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.read().bookings.get(&id).cloned())
    }

    async fn bookings_by_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        Ok(sorted_by_creation(
            self.read()
                .bookings
                .values()
                .filter(|b| b.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn bookings_by_slot(&self, slot_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        Ok(sorted_by_creation(
            self.read()
                .bookings
                .values()
                .filter(|b| b.slot_id == slot_id)
                .cloned()
                .collect(),
        ))
    }

    async fn bookings_by_status(
        &self,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(sorted_by_creation(
            self.read()
                .bookings
                .values()
                .filter(|b| status.map_or(true, |s| b.status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let mut state = self.write();
        match state.bookings.get_mut(&id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                booking.updated_at = updated_at;
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn has_active_overlap(
        &self,
        slot_id: Uuid,
        range: TimeRange,
    ) -> Result<bool, StoreError> {
        Ok(self.read().bookings.values().any(|b| {
            b.slot_id == slot_id
                && b.status == BookingStatus::Booked
                && booking_overlaps(b, &range)
        }))
    }

    async fn busy_slots(
        &self,
        lot_id: Uuid,
        range: TimeRange,
    ) -> Result<HashSet<Uuid>, StoreError> {
        Ok(self
            .read()
            .bookings
            .values()
            .filter(|b| {
                b.lot_id == lot_id
                    && b.status == BookingStatus::Booked
                    && booking_overlaps(b, &range)
            })
            .map(|b| b.slot_id)
            .collect())
    }

    async fn count_occupied_slots(
        &self,
        lot_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.read();
        let occupied: HashSet<Uuid> = state
            .bookings
            .values()
            .filter(|b| {
                b.lot_id == lot_id
                    && b.status == BookingStatus::Booked
                    && booking_covers(b, as_of)
            })
            .map(|b| b.slot_id)
            .collect();
        Ok(occupied.len() as i64)
    }
}
