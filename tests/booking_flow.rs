//! End-to-end exercises of the booking core over the in-memory store:
//! admission, cancellation, and the concurrency guarantees.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use uuid::Uuid;

use parklot::admission::AdmissionController;
use parklot::error::Error;
use parklot::models::{Booking, BookingStatus, ParkingLot, ParkingSlot, Role, User};
use parklot::store::{MemoryStore, Store};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
}

async fn seed_user(store: &MemoryStore, username: &str) -> Uuid {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        first_name: username.to_string(),
        last_name: "Test".to_string(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password_hash: "salt$digest".to_string(),
        role: Role::User,
        created_at: now,
        updated_at: now,
    };
    store.insert_user(&user).await.unwrap();
    user.id
}

async fn seed_lot(store: &MemoryStore) -> Uuid {
    let now = Utc::now();
    let lot = ParkingLot {
        id: Uuid::new_v4(),
        admin_id: Uuid::new_v4(),
        name: "Central".to_string(),
        address: "1 Main St".to_string(),
        latitude: 52.52,
        longitude: 13.40,
        total_slots: 0,
        available_slots: 0,
        created_at: now,
        updated_at: now,
    };
    store.insert_lot(&lot).await.unwrap();
    lot.id
}

async fn seed_slot(store: &MemoryStore, lot_id: Uuid, label: &str) -> Uuid {
    let now = Utc::now();
    let slot = ParkingSlot {
        id: Uuid::new_v4(),
        lot_id,
        label: label.to_string(),
        is_available: true,
        created_at: now,
        updated_at: now,
    };
    store.insert_slot(&slot).await.unwrap();
    slot.id
}

/// Store plus one lot, one slot and one user.
async fn fixture() -> (Arc<MemoryStore>, AdmissionController, Uuid, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let lot_id = seed_lot(&store).await;
    let slot_id = seed_slot(&store, lot_id, "A-1").await;
    let user_id = seed_user(&store, "driver").await;
    let controller = AdmissionController::new(store.clone());
    (store, controller, slot_id, user_id)
}

#[tokio::test]
async fn back_to_back_windows_are_both_admitted() {
    let (_store, controller, slot_id, user_id) = fixture().await;
    controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();
    controller
        .create_booking(slot_id, user_id, at(11, 0), at(12, 0))
        .await
        .unwrap();
}

#[tokio::test]
async fn overlapping_window_is_rejected_with_conflict() {
    let (_store, controller, slot_id, user_id) = fixture().await;
    controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();
    let err = controller
        .create_booking(slot_id, user_id, at(10, 30), at(11, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn cancel_then_rebook_identical_window() {
    let (_store, controller, slot_id, user_id) = fixture().await;
    let booking = controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();
    let cancelled = controller.cancel_booking(booking.id, user_id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();
}

#[tokio::test]
async fn double_cancel_is_a_validation_error_not_a_noop() {
    let (_store, controller, slot_id, user_id) = fixture().await;
    let booking = controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();
    controller.cancel_booking(booking.id, user_id).await.unwrap();
    let err = controller.cancel_booking(booking.id, user_id).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn only_the_owner_may_cancel() {
    let (store, controller, slot_id, user_id) = fixture().await;
    let other = seed_user(&store, "other").await;
    let booking = controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();
    let err = controller.cancel_booking(booking.id, other).await.unwrap_err();
    assert!(matches!(err, Error::Permission(_)));

    // the booking is untouched
    let stored = store.booking_by_id(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Booked);
}

#[tokio::test]
async fn cancelling_a_missing_booking_is_not_found() {
    let (_store, controller, _slot_id, user_id) = fixture().await;
    let err = controller.cancel_booking(Uuid::new_v4(), user_id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn invalid_interval_is_rejected_before_any_lookup() {
    let (_store, controller, _slot_id, user_id) = fixture().await;
    // nonexistent slot: a NotFound here would mean the store was consulted
    // before the interval check
    let err = controller
        .create_booking(Uuid::new_v4(), user_id, at(11, 0), at(10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = controller
        .create_booking(Uuid::new_v4(), user_id, at(10, 0), at(10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn booking_an_unknown_slot_is_not_found() {
    let (_store, controller, _slot_id, user_id) = fixture().await;
    let err = controller
        .create_booking(Uuid::new_v4(), user_id, at(10, 0), at(11, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn terminal_states_admit_no_further_transitions() {
    let (_store, controller, slot_id, user_id) = fixture().await;
    let booking = controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();
    let completed = controller
        .transition_status(booking.id, BookingStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);

    let err = controller
        .transition_status(booking.id, BookingStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let err = controller
        .transition_status(booking.id, BookingStatus::Booked)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_windows_admit_exactly_one() {
    let (_store, controller, slot_id, user_id) = fixture().await;
    const ATTEMPTS: usize = 16;

    let tasks = (0..ATTEMPTS).map(|_| {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
                .await
        })
    });
    let outcomes: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(successes, 1, "exactly one admission must win");
    for outcome in outcomes.iter().filter(|o| o.is_err()) {
        assert!(matches!(outcome.as_ref().unwrap_err(), Error::Conflict(_)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surviving_bookings_never_overlap_under_randomized_load() {
    let (store, controller, slot_id, user_id) = fixture().await;
    const ATTEMPTS: u64 = 48;

    let tasks = (0..ATTEMPTS).map(|i| {
        let controller = controller.clone();
        let mut rng = SmallRng::seed_from_u64(i);
        let start = at(8, 0) + Duration::minutes(rng.gen_range(0..240));
        let end = start + Duration::minutes(rng.gen_range(15..90));
        tokio::spawn(async move {
            let _ = controller.create_booking(slot_id, user_id, start, end).await;
        })
    });
    join_all(tasks).await;

    let survivors: Vec<Booking> = store
        .bookings_by_slot(slot_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.status == BookingStatus::Booked)
        .collect();
    assert!(!survivors.is_empty());

    for (i, a) in survivors.iter().enumerate() {
        for b in survivors.iter().skip(i + 1) {
            let disjoint = a.end_time <= b.start_time || b.end_time <= a.start_time;
            assert!(
                disjoint,
                "bookings [{}, {}) and [{}, {}) overlap",
                a.start_time, a.end_time, b.start_time, b.end_time
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_slots_do_not_contend() {
    let store = Arc::new(MemoryStore::new());
    let lot_id = seed_lot(&store).await;
    let user_id = seed_user(&store, "driver").await;
    let controller = AdmissionController::new(store.clone());

    let mut slot_ids = Vec::new();
    for i in 0..8 {
        slot_ids.push(seed_slot(&store, lot_id, &format!("A-{i}")).await);
    }

    // the same window on every slot: with per-slot admission locks all of
    // them must be admitted
    let tasks = slot_ids.into_iter().map(|slot_id| {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
                .await
        })
    });
    let outcomes = join_all(tasks).await;
    for outcome in outcomes {
        assert!(outcome.unwrap().is_ok());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_double_cancel_applies_once() {
    let (_store, controller, slot_id, user_id) = fixture().await;
    let booking = controller
        .create_booking(slot_id, user_id, at(10, 0), at(11, 0))
        .await
        .unwrap();

    let tasks = (0..8).map(|_| {
        let controller = controller.clone();
        let booking_id = booking.id;
        tokio::spawn(async move { controller.cancel_booking(booking_id, user_id).await })
    });
    let outcomes: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();
    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(successes, 1, "exactly one cancel may apply");
}
