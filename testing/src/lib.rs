//! # Roomhold Testing
//!
//! Testing utilities for the room-hold booking coordinator.
//!
//! This crate provides:
//! - Clocks: a frozen [`FixedClock`] and a [`TokioClock`] that follows Tokio's
//!   (pausable) time, so countdown tests run instantly
//! - [`InMemoryReservationBackend`]: a reservation service with real inventory
//!   rules, failure injection and a call journal
//! - [`ReducerTest`]: Given-When-Then reducer tests
//! - proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use roomhold_testing::{InMemoryReservationBackend, TokioClock, test_clock};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_session_expires() {
//!     let clock = Arc::new(TokioClock::starting_at(test_clock().now()));
//!     let backend = InMemoryReservationBackend::new(clock.clone())
//!         .with_room_type("Deluxe", 3, Money::from_cents(12_000));
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use roomhold_core::environment::Clock;

/// In-memory reservation service
pub mod backend;

/// Given-When-Then reducer tests
pub mod reducer_test;

/// Clocks for tests
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Clock stuck at one instant
    ///
    /// # Example
    ///
    /// ```
    /// use roomhold_testing::mocks::FixedClock;
    /// use roomhold_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Clock that always reads `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Wall clock driven by Tokio's time source
    ///
    /// Reports `base` plus the Tokio time elapsed since construction. Under
    /// `#[tokio::test(start_paused = true)]` time only moves when the runtime
    /// auto-advances or the test calls `tokio::time::advance`, and timers and
    /// `now()` stay in lockstep.
    #[derive(Debug, Clone)]
    pub struct TokioClock {
        base: DateTime<Utc>,
        origin: tokio::time::Instant,
    }

    impl TokioClock {
        /// Create a clock reading `base` right now
        #[must_use]
        pub fn starting_at(base: DateTime<Utc>) -> Self {
            Self {
                base,
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default();
            self.base + elapsed
        }
    }

    /// 2025-01-01T00:00:00Z, the instant every scenario starts from
    ///
    /// # Panics
    ///
    /// Never; the literal is valid RFC 3339.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("valid RFC 3339 literal")
                .with_timezone(&Utc),
        )
    }
}

/// proptest strategies for domain values
pub mod properties {
    use proptest::prelude::*;
    use roomhold_core::types::{RoomTypeId, StayDates};

    /// Room type names used by the strategies
    pub const ROOM_TYPES: [&str; 3] = ["Deluxe", "Suite", "Standard"];

    /// One of [`ROOM_TYPES`]
    pub fn room_type() -> impl Strategy<Value = RoomTypeId> {
        prop::sample::select(ROOM_TYPES.to_vec()).prop_map(RoomTypeId::new)
    }

    /// A stay of 1 to 14 nights starting within a year of 2025-01-01
    #[allow(clippy::expect_used)]
    pub fn stay_dates() -> impl Strategy<Value = StayDates> {
        (0i64..365, 1i64..15).prop_map(|(offset, nights)| {
            let base = chrono::NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date");
            let check_in = base + chrono::Duration::days(offset);
            StayDates::new(check_in, check_in + chrono::Duration::days(nights))
                .expect("check-in precedes check-out")
        })
    }
}

pub use backend::{BackendCall, CallKind, InMemoryReservationBackend};
pub use mocks::{FixedClock, TokioClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
