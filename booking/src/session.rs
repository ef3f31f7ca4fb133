//! Session Controller: the lifecycle of one checkout.
//!
//! ```text
//! Uninitialized ──start──▶ Active ──change_dates──▶ Active
//!                            │
//!                            ├──countdown expiry──▶ Expired
//!                            ├──reset──────────────▶ Reset
//!                            └──complete_checkout──▶ Consumed
//! ```
//!
//! Transitions are serialized by a lifecycle lock. Cart commands do not take
//! it; they consult the shared context instead.

use crate::cart::{CartAction, CartEnvironment, CartReducer, CartState};
use crate::context::BookingSessionContext;
use crate::holds::HoldManager;
use roomhold_core::BookingError;
use roomhold_core::backend::ReservationBackend;
use roomhold_core::environment::Clock;
use roomhold_core::types::{BookingSession, CheckoutPhase, Hold, SessionStatus, StayDates};
use roomhold_runtime::metrics::{BackendMetrics, SessionMetrics};
use roomhold_runtime::{CountdownClock, ExpirySignal, Store};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

/// The cart store driven by the controller
pub type CartStore = Store<CartState, CartAction, CartEnvironment, CartReducer>;

/// Session Controller
pub struct SessionController {
    backend: Arc<dyn ReservationBackend>,
    clock: Arc<dyn Clock>,
    context: BookingSessionContext,
    countdown: CountdownClock,
    holds: HoldManager,
    cart: CartStore,
    call_timeout: Duration,
    lifecycle: Mutex<()>,
}

impl SessionController {
    /// Wires a controller to its collaborators
    #[must_use]
    pub fn new(
        backend: Arc<dyn ReservationBackend>,
        clock: Arc<dyn Clock>,
        context: BookingSessionContext,
        countdown: CountdownClock,
        holds: HoldManager,
        cart: CartStore,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            context,
            countdown,
            holds,
            cart,
            call_timeout,
            lifecycle: Mutex::new(()),
        }
    }

    /// Opens a session for `dates` and starts its countdown
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`] for a past check-in, or while a session
    ///   is already active (use [`SessionController::change_dates`])
    /// - [`BookingError::Network`] and other server errors from session
    ///   creation; the cart is untouched
    #[tracing::instrument(skip_all, fields(dates = %dates))]
    pub async fn start_session(&self, dates: StayDates) -> Result<BookingSession, BookingError> {
        let _transition = self.lifecycle.lock().await;

        if self.context.phase() == CheckoutPhase::Active {
            return Err(BookingError::Validation(
                "a booking session is already active; change its dates instead".to_string(),
            ));
        }
        dates.ensure_not_past(self.clock.today())?;
        self.open(dates).await
    }

    /// Replaces the active session with one for new dates
    ///
    /// Every hold of the old session is released (and the release answered)
    /// and the cart emptied before the new session is requested. If that
    /// request fails the phase is `Reset` and the error is returned.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`] for past dates; the active session is untouched
    /// - [`BookingError::NoActiveSession`] / [`BookingError::Expired`] without an active session
    /// - errors from creating the new session
    #[tracing::instrument(skip_all, fields(dates = %dates))]
    pub async fn change_dates(&self, dates: StayDates) -> Result<BookingSession, BookingError> {
        let _transition = self.lifecycle.lock().await;

        self.context.require_active()?;
        dates.ensure_not_past(self.clock.today())?;

        let Some(previous) = self.context.begin_teardown() else {
            return Err(self.context.snapshot().inactive_error());
        };
        tracing::info!(session = %previous.id, "Changing dates, releasing current holds");

        if let Err(error) = self.holds.release_all(previous.id.clone()).await {
            tracing::warn!(session = %previous.id, %error, "Release-all failed during date change");
        }
        self.clear_cart().await;
        self.countdown.stop();
        self.context.end(SessionStatus::Reset);
        SessionMetrics::record_ended("date_change");

        self.open(dates).await
    }

    /// Tears the session down when its countdown reaches zero
    ///
    /// Signals from a run other than the active session's are ignored.
    pub async fn expire(&self, signal: ExpirySignal) {
        let _transition = self.lifecycle.lock().await;

        if self.context.countdown_run() != Some(signal.run) {
            tracing::debug!(run = signal.run, "Ignoring expiry of a superseded countdown");
            return;
        }
        tracing::info!(deadline = %signal.deadline, "Booking session expired");
        self.tear_down(SessionStatus::Expired).await;
    }

    /// Abandons the active session; does nothing without one
    pub async fn reset(&self) {
        let _transition = self.lifecycle.lock().await;

        if self.context.require_active().is_err() {
            tracing::debug!("Reset without an active session");
            return;
        }
        self.countdown.stop();
        tracing::info!("Booking session reset by the customer");
        self.tear_down(SessionStatus::Reset).await;
    }

    /// Completes checkout: the holds become the booking
    ///
    /// Stops the countdown and hands back the roster without releasing it.
    ///
    /// # Errors
    ///
    /// [`BookingError::NoActiveSession`] / [`BookingError::Expired`] without an
    /// active session.
    pub async fn complete_checkout(&self) -> Result<Vec<Hold>, BookingError> {
        let _transition = self.lifecycle.lock().await;

        self.context.require_active()?;
        self.countdown.stop();
        let session = self.context.end(SessionStatus::Consumed);
        let holds = self.holds.forget_all();
        self.clear_cart().await;

        SessionMetrics::record_ended("consumed");
        tracing::info!(
            session = ?session.map(|s| s.id),
            holds = holds.len(),
            "Checkout completed"
        );
        Ok(holds)
    }

    /// Listens for countdown expiry until the controller is dropped
    #[must_use]
    pub fn spawn_expiry_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut expiry = self.countdown.subscribe_expiry();
        let controller: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match expiry.recv().await {
                    Ok(signal) => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.expire(signal).await;
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Expiry listener lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn open(&self, dates: StayDates) -> Result<BookingSession, BookingError> {
        let started = Instant::now();
        let grant = tokio::time::timeout(self.call_timeout, self.backend.create_session(dates))
            .await
            .unwrap_or_else(|_| {
                Err(BookingError::Network(format!(
                    "create_session timed out after {}ms",
                    self.call_timeout.as_millis()
                )))
            });
        BackendMetrics::record_call("create_session", started.elapsed());
        let grant = grant.inspect_err(|error| {
            tracing::warn!(%error, "Could not open booking session");
        })?;

        let run = self.countdown.start(&grant.expires_at);
        let session = BookingSession {
            id: grant.session_id,
            dates,
            expires_at: run.deadline,
            status: SessionStatus::Active,
        };

        self.clear_cart().await;
        self.context.activate(session.clone(), run.run);
        SessionMetrics::record_started();
        tracing::info!(
            session = %session.id,
            expires_at = %session.expires_at,
            fell_back = run.fell_back,
            "Booking session started"
        );
        Ok(session)
    }

    async fn tear_down(&self, status: SessionStatus) {
        let ended = self.context.end(status);
        self.clear_cart().await;
        if let Some(session) = ended {
            self.holds.release_all_detached(session.id);
        }
        SessionMetrics::record_ended(match status {
            SessionStatus::Expired => "expired",
            SessionStatus::Consumed => "consumed",
            SessionStatus::Active | SessionStatus::Reset => "reset",
        });
    }

    async fn clear_cart(&self) {
        if let Err(error) = self.cart.send(CartAction::Clear).await {
            tracing::warn!(%error, "Cart store refused to clear");
        }
    }
}
