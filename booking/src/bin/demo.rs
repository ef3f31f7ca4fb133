//! Booking demo binary
//!
//! Drives the coordinator against the in-memory reservation service through
//! an expiring session, the room limit, a lock conflict, a failed release and
//! a date change.

use anyhow::Context as _;
use chrono::{Days, NaiveDate};
use roomhold_booking::{BookingConfig, BookingCoordinator};
use roomhold_core::BookingError;
use roomhold_core::environment::{Clock, SystemClock};
use roomhold_core::types::{ClockStatus, Money, RoomTypeId};
use roomhold_runtime::metrics::MetricsExporter;
use roomhold_testing::{CallKind, InMemoryReservationBackend};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn hotel(clock: &Arc<dyn Clock>) -> InMemoryReservationBackend {
    InMemoryReservationBackend::new(Arc::clone(clock))
        .with_room_type("Standard", 10, Money::from_cents(9_000))
        .with_room_type("Deluxe", 4, Money::from_cents(14_000))
        .with_room_type("Suite", 1, Money::from_cents(32_000))
}

fn stay(clock: &Arc<dyn Clock>, from_now: u64, nights: u64) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let check_in = clock
        .today()
        .checked_add_days(Days::new(from_now))
        .context("check-in out of range")?;
    let check_out = check_in
        .checked_add_days(Days::new(nights))
        .context("check-out out of range")?;
    Ok((check_in, check_out))
}

async fn countdown_to_expiry(clock: Arc<dyn Clock>, config: &BookingConfig) -> anyhow::Result<()> {
    println!("\n>>> Scenario 1: a short session counts down and expires");
    let backend = hotel(&clock).with_session_window(chrono::Duration::seconds(3));
    let booking = BookingCoordinator::new(Arc::new(backend), Arc::clone(&clock), config);

    let (check_in, check_out) = stay(&clock, 30, 2)?;
    booking.start_session(check_in, check_out).await?;
    booking.increase(RoomTypeId::new("Deluxe"), 4).await?;

    let mut countdown = booking.subscribe_countdown();
    loop {
        let state = *countdown.borrow_and_update();
        println!("    remaining: {}s", state.remaining_seconds);
        if state.status == ClockStatus::Expired {
            break;
        }
        countdown.changed().await?;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("    phase after expiry: {:?}", booking.phase());
    match booking.increase(RoomTypeId::new("Deluxe"), 4).await {
        Err(e) => println!("    increase after expiry refused: {e}"),
        Ok(hold) => println!("    unexpected hold {hold} after expiry"),
    }
    booking.shutdown(Duration::from_secs(1)).await?;
    Ok(())
}

async fn limit_conflict_and_recovery(clock: Arc<dyn Clock>, config: &BookingConfig) -> anyhow::Result<()> {
    let backend = Arc::new(hotel(&clock));
    let booking = BookingCoordinator::new(backend.clone(), Arc::clone(&clock), config);
    let (check_in, check_out) = stay(&clock, 30, 2)?;
    booking.start_session(check_in, check_out).await?;

    println!("\n>>> Scenario 2: five rooms at most");
    booking.increase(RoomTypeId::new("Deluxe"), 4).await?;
    booking.increase(RoomTypeId::new("Deluxe"), 4).await?;
    let standard = futures::future::join_all(
        (0..3).map(|_| booking.increase(RoomTypeId::new("Standard"), 10)),
    )
    .await;
    println!("    three concurrent Standard holds: {standard:?}");
    match booking.increase(RoomTypeId::new("Standard"), 10).await {
        Err(BookingError::LimitExceeded { max }) => println!("    sixth room refused, limit is {max}"),
        other => println!("    unexpected sixth room outcome: {other:?}"),
    }
    println!("    cart total: {}", booking.total_price().await);

    println!("\n>>> Scenario 3: someone else is holding the suite");
    booking.decrease(RoomTypeId::new("Standard")).await?;
    backend.fail_next(CallKind::AcquireHold, BookingError::LockConflict("suite unit 1".to_string()));
    if let Err(e) = booking.increase(RoomTypeId::new("Suite"), 1).await {
        println!("    {e}");
    }
    println!("    suites in cart: {}", booking.cart().await.count_for(&RoomTypeId::new("Suite")));

    println!("\n>>> Scenario 4: the server fails to release a Deluxe hold");
    backend.fail_next(CallKind::ReleaseHold, BookingError::Network("connection reset".to_string()));
    if let Err(e) = booking.decrease(RoomTypeId::new("Deluxe")).await {
        println!("    {e}");
    }
    let cart = booking.cart().await;
    println!(
        "    Deluxe entry restored: {:?}",
        cart.entry(&RoomTypeId::new("Deluxe")).map(|entry| entry.held_ids().to_vec())
    );

    println!("\n>>> Scenario 5: changing dates drops every hold");
    let old_session = booking
        .subscribe_phase()
        .borrow()
        .session
        .clone()
        .map(|session| session.id)
        .context("no session")?;
    let (check_in, check_out) = stay(&clock, 45, 3)?;
    let session = booking.change_dates(check_in, check_out).await?;
    println!("    new session {} for {}", session.id, session.dates);
    println!(
        "    cart empty: {}, holds left on {old_session}: {}",
        booking.cart().await.is_empty(),
        backend.holds_of(&old_session).len()
    );

    match booking.summary().await {
        Ok(summary) => println!("    summary: {} + {} tax = {}", summary.subtotal, summary.tax, summary.total),
        Err(e) => println!("    summary failed: {e}"),
    }
    booking.reset_session().await;
    booking.shutdown(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = BookingConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomhold_booking=debug,roomhold_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(addr) = config.metrics_addr {
        let mut exporter = MetricsExporter::new(Some(addr));
        exporter.start()?;
        tracing::info!(%addr, "Metrics exporter listening");
    }

    println!("=== Room hold demo ===");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    countdown_to_expiry(Arc::clone(&clock), &config).await?;
    limit_conflict_and_recovery(clock, &config).await?;
    println!("\n=== Done ===");
    Ok(())
}
