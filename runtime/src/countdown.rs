//! Countdown toward a session deadline.
//!
//! The clock publishes the whole seconds left, rounded up, about once per
//! second. It raises exactly one [`ExpirySignal`] per started run, when the
//! count reaches zero. Starting again, or stopping, cancels the previous run
//! before anything else happens, so a superseded run can never publish a
//! tick or an expiry.
//!
//! Remaining time is always derived from `deadline - clock.now()`. The tick
//! only decides when to look at the clock, so a late or skipped tick never
//! makes the count drift.

use chrono::{DateTime, Utc};
use roomhold_core::environment::Clock;
use roomhold_core::types::{ClockState, ClockStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::metrics::SessionMetrics;

/// Window assumed when the server deadline is missing, unparseable or past
pub const DEFAULT_FALLBACK_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Interval between two looks at the clock
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Raised once when a run's countdown reaches zero
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpirySignal {
    /// Run that expired, as returned by [`CountdownClock::start`]
    pub run: u64,
    /// Deadline that was reached
    pub deadline: DateTime<Utc>,
}

/// Handle describing one started run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountdownRun {
    /// Monotonic run number
    pub run: u64,
    /// Deadline actually counted down to
    pub deadline: DateTime<Utc>,
    /// Whether the fallback window replaced the requested deadline
    pub fell_back: bool,
}

struct ActiveRun {
    run: u64,
    task: JoinHandle<()>,
}

struct Shared {
    clock: Arc<dyn Clock>,
    fallback_window: chrono::Duration,
    tick_period: Duration,
    state: watch::Sender<ClockState>,
    expiry: broadcast::Sender<ExpirySignal>,
    active: Mutex<Option<ActiveRun>>,
    runs: AtomicU64,
}

impl Shared {
    fn active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        // A panicking tick task must not wedge the clock
        self.active.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Publishes a tick for `run`; returns `false` once the run is over
    ///
    /// Holding the `active` lock while publishing is what keeps a cancelled
    /// run from ever reaching observers.
    fn publish(&self, run: u64, deadline: DateTime<Utc>, remaining: u64) -> bool {
        let mut active = self.active();
        if active.as_ref().map(|a| a.run) != Some(run) {
            return false;
        }

        let status = if remaining == 0 {
            ClockStatus::Expired
        } else {
            ClockStatus::Running
        };
        let next = ClockState {
            deadline: Some(deadline),
            remaining_seconds: remaining,
            status,
        };
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if remaining == 0 {
            *active = None;
            SessionMetrics::record_countdown_expired();
            tracing::info!(run, %deadline, "Countdown reached zero");
            // No receivers is fine: nothing is listening for expiry
            let _ = self.expiry.send(ExpirySignal { run, deadline });
            return false;
        }
        true
    }
}

/// Ticking countdown with single-shot expiry
///
/// Cheap to clone; clones share the same run. Must be started from within a
/// Tokio runtime.
#[derive(Clone)]
pub struct CountdownClock {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CountdownClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownClock")
            .field("state", &*self.shared.state.borrow())
            .field("tick_period", &self.shared.tick_period)
            .finish_non_exhaustive()
    }
}

impl CountdownClock {
    /// Creates a stopped clock with the default window and tick period
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(clock, DEFAULT_FALLBACK_WINDOW, DEFAULT_TICK_PERIOD)
    }

    /// Creates a stopped clock
    #[must_use]
    pub fn with_settings(clock: Arc<dyn Clock>, fallback_window: Duration, tick_period: Duration) -> Self {
        let (state, _) = watch::channel(ClockState::default());
        let (expiry, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                clock,
                fallback_window: chrono::Duration::from_std(fallback_window)
                    .unwrap_or_else(|_| chrono::Duration::minutes(15)),
                tick_period: tick_period.max(Duration::from_millis(1)),
                state,
                expiry,
                active: Mutex::new(None),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Starts counting down to a deadline received from the server
    ///
    /// Falls back to `now + fallback_window` when `raw_deadline` is not RFC
    /// 3339 or is not in the future.
    pub fn start(&self, raw_deadline: &str) -> CountdownRun {
        match DateTime::parse_from_rfc3339(raw_deadline) {
            Ok(parsed) => self.start_at(parsed.with_timezone(&Utc)),
            Err(error) => {
                tracing::warn!(raw_deadline, %error, "Unparseable session deadline, using fallback window");
                self.launch(self.shared.clock.now() + self.shared.fallback_window, true)
            },
        }
    }

    /// Starts counting down to `deadline`, falling back if it is not in the future
    pub fn start_at(&self, deadline: DateTime<Utc>) -> CountdownRun {
        let now = self.shared.clock.now();
        if deadline <= now {
            tracing::warn!(%deadline, %now, "Session deadline already passed, using fallback window");
            return self.launch(now + self.shared.fallback_window, true);
        }
        self.launch(deadline, false)
    }

    /// Cancels the current run and returns to `Uninitialized`
    ///
    /// Returns whether a run was cancelled. No tick or expiry of the
    /// cancelled run is published after this returns.
    pub fn stop(&self) -> bool {
        let mut active = self.shared.active();
        let cancelled = active.take().map(|previous| {
            previous.task.abort();
            tracing::debug!(run = previous.run, "Countdown stopped");
        });
        self.shared.state.send_replace(ClockState::default());
        cancelled.is_some()
    }

    /// Latest clock state
    #[must_use]
    pub fn snapshot(&self) -> ClockState {
        *self.shared.state.borrow()
    }

    /// Run currently ticking, if any
    #[must_use]
    pub fn current_run(&self) -> Option<u64> {
        self.shared.active().as_ref().map(|a| a.run)
    }

    /// Subscribes to clock state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClockState> {
        self.shared.state.subscribe()
    }

    /// Subscribes to expiry signals
    #[must_use]
    pub fn subscribe_expiry(&self) -> broadcast::Receiver<ExpirySignal> {
        self.shared.expiry.subscribe()
    }

    fn launch(&self, deadline: DateTime<Utc>, fell_back: bool) -> CountdownRun {
        let mut active = self.shared.active();
        if let Some(previous) = active.take() {
            previous.task.abort();
            tracing::debug!(run = previous.run, "Countdown superseded");
        }

        let run = self.shared.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let remaining = remaining_seconds(deadline, self.shared.clock.now());
        self.shared.state.send_replace(ClockState {
            deadline: Some(deadline),
            remaining_seconds: remaining,
            status: ClockStatus::Running,
        });

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(tick(shared, run, deadline, remaining));
        *active = Some(ActiveRun { run, task });

        tracing::info!(run, %deadline, remaining_seconds = remaining, fell_back, "Countdown started");
        CountdownRun {
            run,
            deadline,
            fell_back,
        }
    }
}

async fn tick(shared: Arc<Shared>, run: u64, deadline: DateTime<Utc>, initial: u64) {
    let mut interval = tokio::time::interval(shared.tick_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = initial;

    loop {
        interval.tick().await;
        // Never count back up, even if the wall clock is moved backwards
        let remaining = remaining_seconds(deadline, shared.clock.now()).min(last);
        last = remaining;
        if !shared.publish(run, deadline, remaining) {
            return;
        }
    }
}

/// Whole seconds from `now` to `deadline`, rounded up, never negative
#[must_use]
pub fn remaining_seconds(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        u64::try_from(millis).map_or(0, |ms| ms.div_ceil(1000))
    }
}
