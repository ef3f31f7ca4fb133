//! End-to-end checkout scenarios against the in-memory reservation service.
//!
//! Time is paused, so the 15 minute countdown runs in milliseconds and stays
//! in lockstep with the clock the backend stamps deadlines with.

#![allow(clippy::unwrap_used)]

use chrono::NaiveDate;
use roomhold_booking::{BookingConfig, BookingCoordinator};
use roomhold_core::BookingError;
use roomhold_core::environment::Clock;
use roomhold_core::types::{CheckoutPhase, ClockStatus, HoldId, Money, RoomTypeId, SessionId};
use roomhold_testing::{BackendCall, CallKind, InMemoryReservationBackend, TokioClock, test_clock};
use std::sync::Arc;
use std::time::Duration;

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

fn deluxe() -> RoomTypeId {
    RoomTypeId::new("Deluxe")
}

fn standard() -> RoomTypeId {
    RoomTypeId::new("Standard")
}

fn suite() -> RoomTypeId {
    RoomTypeId::new("Suite")
}

struct Harness {
    backend: Arc<InMemoryReservationBackend>,
    clock: Arc<dyn Clock>,
}

impl Harness {
    fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(test_clock().now()));
        let backend = InMemoryReservationBackend::new(Arc::clone(&clock))
            .with_room_type("Standard", 10, Money::from_cents(9_000))
            .with_room_type("Deluxe", 3, Money::from_cents(14_000))
            .with_room_type("Suite", 1, Money::from_cents(32_000));
        Self {
            backend: Arc::new(backend),
            clock,
        }
    }

    fn booking(&self) -> BookingCoordinator {
        BookingCoordinator::new(self.backend.clone(), Arc::clone(&self.clock), &BookingConfig::default())
    }

    async fn active_booking(&self) -> BookingCoordinator {
        let booking = self.booking();
        booking
            .start_session(date("2025-12-01"), date("2025-12-03"))
            .await
            .unwrap();
        booking
    }
}

/// Lets spawned effects and background releases run
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_countdown_runs_from_900_to_zero_and_expires_once() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    let mut countdown = booking.subscribe_countdown();
    assert_eq!(countdown.borrow().remaining_seconds, 900);
    booking.increase(deluxe(), 3).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let state = *countdown.borrow_and_update();
        seen.push(state.remaining_seconds);
        if state.status == ClockStatus::Expired {
            break;
        }
        countdown.changed().await.unwrap();
    }

    assert!(seen.first().is_some_and(|first| *first <= 900));
    assert_eq!(seen.last(), Some(&0));
    assert!(seen.windows(2).all(|pair| pair[0] == pair[1] + 1), "ticks skipped: {seen:?}");

    settle().await;
    assert_eq!(booking.phase(), CheckoutPhase::Expired);
    assert!(booking.cart().await.is_empty());
    assert!(booking.roster().is_empty());
    assert_eq!(harness.backend.call_count(CallKind::ReleaseAllHolds), 1);

    // Nothing fires again, however long we wait
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(harness.backend.call_count(CallKind::ReleaseAllHolds), 1);
    assert_eq!(booking.subscribe_countdown().borrow().remaining_seconds, 0);

    assert_eq!(booking.increase(deluxe(), 3).await, Err(BookingError::Expired));
}

#[tokio::test(start_paused = true)]
async fn test_sixth_room_is_refused_without_a_call() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;

    booking.increase(deluxe(), 3).await.unwrap();
    booking.increase(deluxe(), 3).await.unwrap();
    for _ in 0..3 {
        booking.increase(standard(), 10).await.unwrap();
    }
    assert_eq!(booking.cart().await.total_count(), 5);

    let err = booking.increase(standard(), 10).await.unwrap_err();
    assert!(matches!(err, BookingError::LimitExceeded { max: 5 }));
    assert_eq!(harness.backend.call_count(CallKind::AcquireHold), 5);
    assert_eq!(booking.roster().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_listed_availability_caps_a_room_type() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;

    booking.increase(deluxe(), 1).await.unwrap();
    let err = booking.increase(deluxe(), 1).await.unwrap_err();
    assert!(matches!(err, BookingError::Capacity(_)));
    assert_eq!(harness.backend.call_count(CallKind::AcquireHold), 1);
}

#[tokio::test(start_paused = true)]
async fn test_locked_suite_leaves_cart_empty() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;

    harness
        .backend
        .fail_next(CallKind::AcquireHold, BookingError::LockConflict("suite unit 1".into()));
    let err = booking.increase(suite(), 1).await.unwrap_err();
    assert_eq!(err, BookingError::LockConflict("suite unit 1".into()));

    let cart = booking.cart().await;
    assert!(cart.is_empty());
    assert_eq!(cart.reserved_count(), 0);
    assert!(booking.roster().is_empty());
    assert_eq!(booking.subscribe_cart().borrow().last_error, Some(err));

    // Retrying after the conflict clears works
    assert_eq!(booking.increase(suite(), 1).await.unwrap(), HoldId::new("h1"));
}

#[tokio::test(start_paused = true)]
async fn test_suite_held_by_another_customer_is_capacity() {
    let harness = Harness::new();
    let first = harness.active_booking().await;
    let second = harness.active_booking().await;

    first.increase(suite(), 1).await.unwrap();
    let err = second.increase(suite(), 1).await.unwrap_err();
    assert!(matches!(err, BookingError::Capacity(_)));
    assert!(second.cart().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_release_keeps_the_hold() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    let h1 = booking.increase(deluxe(), 3).await.unwrap();

    harness
        .backend
        .fail_next(CallKind::ReleaseHold, BookingError::Network("connection reset".into()));
    let err = booking.decrease(deluxe()).await.unwrap_err();
    assert!(matches!(err, BookingError::Network(_)));

    let cart = booking.cart().await;
    let entry = cart.entry(&deluxe()).unwrap();
    assert_eq!(entry.count(), 1);
    assert_eq!(entry.held_ids(), &[h1.clone()]);
    assert_eq!(booking.roster().len(), 1);
    assert_eq!(booking.roster()[0].id, h1);
}

#[tokio::test(start_paused = true)]
async fn test_decrease_of_empty_type_makes_no_call() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;

    assert_eq!(booking.decrease(suite()).await, Ok(None));
    assert_eq!(harness.backend.call_count(CallKind::ReleaseHold), 0);
}

#[tokio::test(start_paused = true)]
async fn test_decrease_releases_most_recent_hold() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    let h1 = booking.increase(deluxe(), 3).await.unwrap();
    let h2 = booking.increase(deluxe(), 3).await.unwrap();

    assert_eq!(booking.decrease(deluxe()).await, Ok(Some(h2)));
    let cart = booking.cart().await;
    assert_eq!(cart.entry(&deluxe()).unwrap().held_ids(), &[h1]);
    assert_eq!(harness.backend.open_holds(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_change_dates_drops_every_old_hold_first() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    booking.increase(deluxe(), 3).await.unwrap();
    booking.increase(standard(), 10).await.unwrap();

    let session = booking
        .change_dates(date("2025-12-10"), date("2025-12-13"))
        .await
        .unwrap();
    assert_eq!(session.id, SessionId::new("s2"));
    assert_eq!(session.dates.nights(), 3);

    assert!(booking.cart().await.is_empty());
    assert!(booking.roster().is_empty());
    assert!(harness.backend.holds_of(&SessionId::new("s1")).is_empty());

    let calls = harness.backend.calls();
    let released = calls
        .iter()
        .position(|c| c == &BackendCall::ReleaseAllHolds(SessionId::new("s1")))
        .unwrap();
    let reopened = calls
        .iter()
        .rposition(|c| c.kind() == CallKind::CreateSession)
        .unwrap();
    assert!(released < reopened);

    // The new session holds rooms normally
    booking.increase(deluxe(), 3).await.unwrap();
    assert_eq!(harness.backend.holds_of(&SessionId::new("s2")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_change_dates_to_the_past_keeps_the_session() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    booking.increase(deluxe(), 3).await.unwrap();

    let err = booking
        .change_dates(date("2024-06-01"), date("2024-06-03"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
    assert_eq!(booking.phase(), CheckoutPhase::Active);
    assert_eq!(booking.cart().await.total_count(), 1);
    assert_eq!(harness.backend.call_count(CallKind::ReleaseAllHolds), 0);
}

#[tokio::test(start_paused = true)]
async fn test_change_dates_failure_leaves_reset_phase() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    booking.increase(deluxe(), 3).await.unwrap();

    harness
        .backend
        .fail_next(CallKind::CreateSession, BookingError::Network("gateway timeout".into()));
    let err = booking
        .change_dates(date("2025-12-10"), date("2025-12-12"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Network(_)));
    assert_eq!(booking.phase(), CheckoutPhase::Reset);
    assert!(booking.cart().await.is_empty());
    assert_eq!(booking.increase(deluxe(), 3).await, Err(BookingError::NoActiveSession));
}

#[tokio::test(start_paused = true)]
async fn test_start_session_validates_and_refuses_while_active() {
    let harness = Harness::new();
    let booking = harness.booking();

    let err = booking
        .start_session(date("2025-12-03"), date("2025-12-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
    assert_eq!(harness.backend.call_count(CallKind::CreateSession), 0);

    booking
        .start_session(date("2025-12-01"), date("2025-12-03"))
        .await
        .unwrap();
    let err = booking
        .start_session(date("2025-12-05"), date("2025-12-06"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
    assert_eq!(harness.backend.call_count(CallKind::CreateSession), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_deadline_falls_back_to_fifteen_minutes() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(test_clock().now()));
    let backend = InMemoryReservationBackend::new(Arc::clone(&clock)).with_session_deadline("soon");
    let booking = BookingCoordinator::new(Arc::new(backend), clock, &BookingConfig::default());

    let session = booking
        .start_session(date("2025-12-01"), date("2025-12-03"))
        .await
        .unwrap();
    assert_eq!(session.expires_at, test_clock().now() + chrono::Duration::minutes(15));
    assert_eq!(booking.subscribe_countdown().borrow().remaining_seconds, 900);
}

#[tokio::test(start_paused = true)]
async fn test_reset_is_idempotent_and_releases_in_background() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    booking.increase(deluxe(), 3).await.unwrap();

    booking.reset_session().await;
    booking.reset_session().await;
    settle().await;

    assert_eq!(booking.phase(), CheckoutPhase::Reset);
    assert_eq!(harness.backend.call_count(CallKind::ReleaseAllHolds), 1);
    assert_eq!(harness.backend.open_holds(), 0);
    assert_eq!(booking.subscribe_countdown().borrow().status, ClockStatus::Uninitialized);
}

#[tokio::test(start_paused = true)]
async fn test_complete_checkout_hands_over_holds() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    let h1 = booking.increase(deluxe(), 3).await.unwrap();
    let h2 = booking.increase(suite(), 1).await.unwrap();

    let holds = booking.complete_checkout().await.unwrap();
    let ids: Vec<HoldId> = holds.into_iter().map(|hold| hold.id).collect();
    assert_eq!(ids, vec![h1, h2]);

    settle().await;
    assert_eq!(booking.phase(), CheckoutPhase::Consumed);
    assert_eq!(harness.backend.open_holds(), 2);
    assert_eq!(harness.backend.call_count(CallKind::ReleaseAllHolds), 0);
    assert!(booking.roster().is_empty());
    assert_eq!(booking.increase(deluxe(), 3).await, Err(BookingError::NoActiveSession));

    // The stopped countdown never expires the consumed session
    tokio::time::sleep(Duration::from_secs(1_000)).await;
    assert_eq!(booking.phase(), CheckoutPhase::Consumed);
}

#[tokio::test(start_paused = true)]
async fn test_late_grant_after_reset_is_released() {
    let harness = Harness::new();
    let booking = Arc::new(harness.active_booking().await);
    harness.backend.delay_next(CallKind::AcquireHold, Duration::from_secs(5));

    let pending = tokio::spawn({
        let booking = Arc::clone(&booking);
        async move { booking.increase(deluxe(), 3).await }
    });
    while harness.backend.call_count(CallKind::AcquireHold) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    booking.reset_session().await;
    assert_eq!(pending.await.unwrap(), Err(BookingError::NoActiveSession));

    settle().await;
    assert!(booking.cart().await.is_empty());
    assert!(booking.roster().is_empty());
    assert_eq!(harness.backend.open_holds(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_same_type_increases_are_serialized() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    harness.backend.delay_next(CallKind::AcquireHold, Duration::from_millis(200));

    let results = futures::future::join_all((0..3).map(|_| booking.increase(deluxe(), 3))).await;
    let ids: Vec<HoldId> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(ids.len(), 3);

    let cart = booking.cart().await;
    assert_eq!(cart.entry(&deluxe()).unwrap().held_ids(), ids.as_slice());
    assert_eq!(booking.roster().len(), 3);

    // A fourth is refused by the listed availability, not the server
    let err = booking.increase(deluxe(), 3).await.unwrap_err();
    assert!(matches!(err, BookingError::Capacity(_)));
    assert_eq!(harness.backend.call_count(CallKind::AcquireHold), 3);
}

#[tokio::test(start_paused = true)]
async fn test_summary_and_local_total() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    booking.increase(deluxe(), 3).await.unwrap();
    booking.increase(standard(), 10).await.unwrap();

    // Two nights each
    let expected = Money::from_cents((14_000 + 9_000) * 2);
    assert_eq!(booking.total_price().await, expected);

    let summary = booking.summary().await.unwrap();
    assert_eq!(summary.subtotal, expected);
    assert_eq!(summary.total, summary.subtotal.plus(summary.tax));
}

#[tokio::test(start_paused = true)]
async fn test_hung_acquire_times_out_as_network_error() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    harness.backend.hang_next(CallKind::AcquireHold);

    let err = booking.increase(deluxe(), 3).await.unwrap_err();
    assert!(matches!(err, BookingError::Network(_)));
    assert!(booking.cart().await.is_empty());
    assert_eq!(booking.cart().await.reserved_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_further_commands() {
    let harness = Harness::new();
    let booking = harness.active_booking().await;
    booking.increase(deluxe(), 3).await.unwrap();

    booking.shutdown(Duration::from_secs(1)).await.unwrap();
    assert!(booking.increase(deluxe(), 3).await.is_err());
}
