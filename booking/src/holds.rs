//! Hold Manager: acquires and releases single-unit holds and keeps the roster.
//!
//! The roster is a local cache of what the server holds for the current
//! session. Every call is bounded by the configured timeout; a timeout is a
//! [`BookingError::Network`].
//!
//! Each teardown (release-all, or consumption at checkout) bumps the roster
//! epoch. An answer that arrives for an older epoch, or for a session that is
//! no longer current, never enters the roster: the hold is released in the
//! background instead.

use crate::context::BookingSessionContext;
use roomhold_core::BookingError;
use roomhold_core::backend::{BackendFuture, BookingSummary, HoldRequest, ReservationBackend};
use roomhold_core::types::{Hold, HoldId, SessionId};
use roomhold_runtime::metrics::{BackendMetrics, HoldMetrics};
use roomhold_runtime::retry::{RetryPolicy, retry_transient};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Roster {
    epoch: u64,
    holds: Vec<Hold>,
}

struct Inner {
    backend: Arc<dyn ReservationBackend>,
    context: BookingSessionContext,
    roster: Mutex<Roster>,
    call_timeout: Duration,
    release_retry: RetryPolicy,
}

/// Hold Manager
///
/// Cheap to clone; clones share the roster.
#[derive(Clone)]
pub struct HoldManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HoldManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldManager")
            .field("holds", &self.roster().holds.len())
            .field("call_timeout", &self.inner.call_timeout)
            .finish_non_exhaustive()
    }
}

impl HoldManager {
    /// Creates a manager with an empty roster
    #[must_use]
    pub fn new(
        backend: Arc<dyn ReservationBackend>,
        context: BookingSessionContext,
        call_timeout: Duration,
        release_retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                context,
                roster: Mutex::new(Roster::default()),
                call_timeout,
                release_retry,
            }),
        }
    }

    /// Acquires one unit and appends the hold to the roster
    ///
    /// # Errors
    ///
    /// - [`BookingError::Capacity`], [`BookingError::LockConflict`],
    ///   [`BookingError::Validation`] or [`BookingError::Network`] from the call;
    ///   the roster is untouched
    /// - [`BookingError::NoActiveSession`] / [`BookingError::Expired`] when the
    ///   session is not current, before or after the call
    #[tracing::instrument(skip(self, request), fields(session = %request.session_id, room_type = %request.room_type))]
    pub async fn acquire(&self, request: HoldRequest) -> Result<Hold, BookingError> {
        if !self.inner.context.is_current(&request.session_id) {
            return Err(self.inner.context.snapshot().inactive_error());
        }
        let epoch = self.roster().epoch;

        let requested_expiry = request.expires_at;
        let grant = match self
            .call("acquire_hold", self.inner.backend.acquire_hold(request.clone()))
            .await
        {
            Ok(grant) => grant,
            Err(error) => {
                HoldMetrics::record_failed(error.kind());
                tracing::debug!(%error, "Hold refused");
                return Err(error);
            },
        };

        let hold = Hold {
            expires_at: grant.resolve_expiry(requested_expiry),
            id: grant.hold_id,
            room_type: request.room_type,
            session_id: request.session_id,
            dates: request.dates,
            unit_price: grant.unit_price,
        };

        {
            let mut roster = self.roster();
            if roster.epoch == epoch && self.inner.context.is_current(&hold.session_id) {
                roster.holds.push(hold.clone());
                HoldMetrics::record_acquired();
                tracing::debug!(hold = %hold.id, "Hold acquired");
                return Ok(hold);
            }
        }

        tracing::warn!(hold = %hold.id, "Hold granted after its session was torn down, releasing it");
        self.release_stale(hold.id);
        Err(self.inner.context.snapshot().inactive_error())
    }

    /// Releases one hold
    ///
    /// The hold leaves the roster before the call and is put back at its
    /// original position if the call fails.
    ///
    /// # Errors
    ///
    /// Returns the call's error after restoring the roster.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, hold_id: HoldId) -> Result<(), BookingError> {
        let (removed, epoch) = {
            let mut roster = self.roster();
            let removed = roster
                .holds
                .iter()
                .position(|h| h.id == hold_id)
                .map(|index| (index, roster.holds.remove(index)));
            (removed, roster.epoch)
        };

        match self.call("release_hold", self.inner.backend.release_hold(hold_id.clone())).await {
            Ok(()) => {
                HoldMetrics::record_released(1);
                tracing::debug!("Hold released");
                Ok(())
            },
            Err(error) => {
                if let Some((index, hold)) = removed {
                    let mut roster = self.roster();
                    // A teardown in the meantime already dropped the whole roster
                    if roster.epoch == epoch {
                        let index = index.min(roster.holds.len());
                        roster.holds.insert(index, hold);
                    }
                }
                tracing::warn!(%error, "Hold release failed, restored to roster");
                Err(error)
            },
        }
    }

    /// Releases every hold of a session
    ///
    /// The local roster is cleared immediately, whatever the outcome.
    /// Transient failures are retried per the release policy.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn release_all(&self, session_id: SessionId) -> Result<(), BookingError> {
        let dropped = self.drain().len();
        self.release_on_server(session_id, dropped).await
    }

    /// [`HoldManager::release_all`] without waiting for the server
    ///
    /// The roster is cleared before returning, so a session opened right
    /// after keeps whatever it acquires.
    pub fn release_all_detached(&self, session_id: SessionId) {
        let dropped = self.drain().len();
        let manager = self.clone();
        tokio::spawn(async move {
            // Failure is already logged; the server drops the holds at expiry
            let _ = manager.release_on_server(session_id, dropped).await;
        });
    }

    /// Drops every hold from the roster without telling the server
    ///
    /// Used when checkout completes and the holds become the booking.
    pub fn forget_all(&self) -> Vec<Hold> {
        self.drain()
    }

    /// Current roster
    #[must_use]
    pub fn roster_snapshot(&self) -> Vec<Hold> {
        self.roster().holds.clone()
    }

    /// Prices a set of holds
    ///
    /// # Errors
    ///
    /// Returns the call's error.
    pub async fn summary(&self, hold_ids: Vec<HoldId>) -> Result<BookingSummary, BookingError> {
        self.call("summary", self.inner.backend.summary(hold_ids)).await
    }

    fn drain(&self) -> Vec<Hold> {
        let mut roster = self.roster();
        roster.epoch += 1;
        std::mem::take(&mut roster.holds)
    }

    async fn release_on_server(&self, session_id: SessionId, dropped: usize) -> Result<(), BookingError> {
        tracing::debug!(session = %session_id, dropped, "Releasing all holds");

        let backend = &self.inner.backend;
        let result = retry_transient(&self.inner.release_retry, "release_all_holds", || {
            self.call("release_all_holds", backend.release_all_holds(session_id.clone()))
        })
        .await;

        match &result {
            Ok(()) => HoldMetrics::record_released(dropped),
            Err(error) => tracing::warn!(%error, "Release-all failed; server holds will lapse on their own"),
        }
        result
    }

    fn release_stale(&self, hold_id: HoldId) {
        let manager = self.clone();
        tokio::spawn(async move {
            let released = manager
                .call("release_hold", manager.inner.backend.release_hold(hold_id.clone()))
                .await;
            if let Err(error) = released {
                tracing::warn!(hold = %hold_id, %error, "Could not release stale hold");
            }
        });
    }

    async fn call<T>(&self, call: &'static str, future: BackendFuture<'_, T>) -> Result<T, BookingError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.inner.call_timeout, future)
            .await
            .unwrap_or_else(|_| {
                Err(BookingError::Network(format!(
                    "{call} timed out after {}ms",
                    self.inner.call_timeout.as_millis()
                )))
            });
        BackendMetrics::record_call(call, started.elapsed());
        result
    }

    fn roster(&self) -> MutexGuard<'_, Roster> {
        self.inner.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use roomhold_core::environment::Clock;
    use roomhold_core::types::{BookingSession, Money, SessionStatus, StayDates};
    use roomhold_testing::{CallKind, InMemoryReservationBackend, test_clock};

    struct Fixture {
        backend: Arc<InMemoryReservationBackend>,
        context: BookingSessionContext,
        holds: HoldManager,
        session: BookingSession,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(
            InMemoryReservationBackend::new(Arc::new(test_clock()))
                .with_room_type("Deluxe", 3, Money::from_cents(12_000)),
        );
        let context = BookingSessionContext::new();
        let holds = HoldManager::new(
            backend.clone(),
            context.clone(),
            Duration::from_secs(1),
            RetryPolicy::none(),
        );

        let dates = StayDates::parse("2025-12-01", "2025-12-03").unwrap();
        let grant = backend.create_session(dates).await.unwrap();
        let session = BookingSession {
            id: grant.session_id,
            dates,
            expires_at: test_clock().now() + chrono::Duration::minutes(15),
            status: SessionStatus::Active,
        };
        context.activate(session.clone(), 1);

        Fixture {
            backend,
            context,
            holds,
            session,
        }
    }

    fn request(session: &BookingSession) -> HoldRequest {
        HoldRequest {
            session_id: session.id.clone(),
            room_type: "Deluxe".into(),
            dates: session.dates,
            expires_at: session.expires_at,
        }
    }

    #[tokio::test]
    async fn test_acquire_appends_to_roster() {
        let f = fixture().await;
        let first = f.holds.acquire(request(&f.session)).await.unwrap();
        let second = f.holds.acquire(request(&f.session)).await.unwrap();

        let roster: Vec<_> = f.holds.roster_snapshot().into_iter().map(|h| h.id).collect();
        assert_eq!(roster, vec![first.id, second.id]);
        assert_eq!(second.unit_price, Money::from_cents(12_000));
    }

    #[tokio::test]
    async fn test_failed_acquire_leaves_roster_alone() {
        let f = fixture().await;
        f.backend.fail_next(CallKind::AcquireHold, BookingError::LockConflict("unit 4".into()));

        let err = f.holds.acquire(request(&f.session)).await.unwrap_err();
        assert!(matches!(err, BookingError::LockConflict(_)));
        assert!(f.holds.roster_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_failed_release_restores_position() {
        let f = fixture().await;
        let h1 = f.holds.acquire(request(&f.session)).await.unwrap().id;
        let h2 = f.holds.acquire(request(&f.session)).await.unwrap().id;

        f.backend.fail_next(CallKind::ReleaseHold, BookingError::Network("reset".into()));
        let err = f.holds.release(h1.clone()).await.unwrap_err();
        assert!(err.is_retryable());

        let roster: Vec<_> = f.holds.roster_snapshot().into_iter().map(|h| h.id).collect();
        assert_eq!(roster, vec![h1, h2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_as_network_error() {
        let f = fixture().await;
        f.backend.hang_next(CallKind::AcquireHold);

        let err = f.holds.acquire(request(&f.session)).await.unwrap_err();
        assert!(matches!(err, BookingError::Network(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_release_all_clears_roster_even_on_failure() {
        let f = fixture().await;
        f.holds.acquire(request(&f.session)).await.unwrap();
        f.backend.fail_next(CallKind::ReleaseAllHolds, BookingError::Network("down".into()));

        assert!(f.holds.release_all(f.session.id.clone()).await.is_err());
        assert!(f.holds.roster_snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_after_teardown_is_released_not_kept() {
        let f = fixture().await;
        f.backend.delay_next(CallKind::AcquireHold, Duration::from_millis(500));

        let pending = tokio::spawn({
            let holds = f.holds.clone();
            let request = request(&f.session);
            async move { holds.acquire(request).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.context.end(SessionStatus::Reset);

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, BookingError::NoActiveSession);
        assert!(f.holds.roster_snapshot().is_empty());

        // Background release of the stale grant
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.backend.call_count(CallKind::ReleaseHold), 1);
        assert_eq!(f.backend.open_holds(), 0);
    }

    #[tokio::test]
    async fn test_detached_release_all_spares_next_session() {
        let f = fixture().await;
        f.holds.acquire(request(&f.session)).await.unwrap();

        f.context.end(SessionStatus::Reset);
        f.holds.release_all_detached(f.session.id.clone());
        assert!(f.holds.roster_snapshot().is_empty());

        let grant = f.backend.create_session(f.session.dates).await.unwrap();
        let next = BookingSession {
            id: grant.session_id,
            ..f.session.clone()
        };
        f.context.activate(next.clone(), 2);
        let kept = f.holds.acquire(request(&next)).await.unwrap().id;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let roster: Vec<_> = f.holds.roster_snapshot().into_iter().map(|h| h.id).collect();
        assert_eq!(roster, vec![kept]);
        assert_eq!(f.backend.call_count(CallKind::ReleaseAllHolds), 1);
        assert_eq!(f.backend.holds_of(&f.session.id).len(), 0);
    }
}
