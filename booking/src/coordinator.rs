//! The facade a booking UI talks to.
//!
//! [`BookingCoordinator`] wires the countdown, the hold manager, the cart
//! store and the session controller around one [`ReservationBackend`], and
//! turns cart commands into request/response calls over the store's feedback
//! loop.

use crate::cart::{CartAction, CartEnvironment, CartOutcome, CartReducer, CartState};
use crate::config::BookingConfig;
use crate::context::{BookingSessionContext, SessionSlot};
use crate::holds::HoldManager;
use crate::recovery::RequestId;
use crate::session::{CartStore, SessionController};
use chrono::NaiveDate;
use roomhold_core::BookingError;
use roomhold_core::backend::{BookingSummary, ReservationBackend};
use roomhold_core::environment::Clock;
use roomhold_core::types::{BookingSession, Cart, CheckoutPhase, ClockState, Hold, HoldId, Money, RoomTypeId, StayDates};
use roomhold_runtime::{CountdownClock, Store, StoreConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One customer's checkout
pub struct BookingCoordinator {
    context: BookingSessionContext,
    countdown: CountdownClock,
    holds: HoldManager,
    cart: CartStore,
    controller: Arc<SessionController>,
    expiry_listener: Mutex<Option<JoinHandle<()>>>,
    command_timeout: Duration,
}

impl std::fmt::Debug for BookingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingCoordinator")
            .field("phase", &self.context.phase())
            .field("holds", &self.holds)
            .finish_non_exhaustive()
    }
}

impl BookingCoordinator {
    /// Builds a coordinator; must be called inside a tokio runtime
    #[must_use]
    pub fn new(backend: Arc<dyn ReservationBackend>, clock: Arc<dyn Clock>, config: &BookingConfig) -> Self {
        let context = BookingSessionContext::new();
        let countdown =
            CountdownClock::with_settings(Arc::clone(&clock), config.fallback_window(), config.tick_interval());
        let holds = HoldManager::new(
            Arc::clone(&backend),
            context.clone(),
            config.call_timeout(),
            config.release_retry(),
        );

        let environment = CartEnvironment {
            holds: holds.clone(),
            context: context.clone(),
            clock: Arc::clone(&clock),
            expiry_policy: config.holds.expiry,
        };
        let store_config = StoreConfig::default().with_broadcast_capacity(config.broadcast_capacity);
        let cart = Store::with_config(CartState::default(), CartReducer, environment, &store_config);

        let controller = Arc::new(SessionController::new(
            backend,
            clock,
            context.clone(),
            countdown.clone(),
            holds.clone(),
            cart.clone(),
            config.call_timeout(),
        ));
        let listener = controller.spawn_expiry_listener();

        Self {
            context,
            countdown,
            holds,
            cart,
            controller,
            expiry_listener: Mutex::new(Some(listener)),
            command_timeout: config.command_timeout(),
        }
    }

    /// Opens a session for the given stay
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for an empty, inverted or past stay or
    /// while a session is active; server errors from session creation.
    pub async fn start_session(&self, check_in: NaiveDate, check_out: NaiveDate) -> Result<BookingSession, BookingError> {
        let dates = StayDates::new(check_in, check_out)?;
        self.controller.start_session(dates).await
    }

    /// Moves the active session to new dates, dropping every hold
    ///
    /// # Errors
    ///
    /// See [`SessionController::change_dates`].
    pub async fn change_dates(&self, check_in: NaiveDate, check_out: NaiveDate) -> Result<BookingSession, BookingError> {
        let dates = StayDates::new(check_in, check_out)?;
        self.controller.change_dates(dates).await
    }

    /// Holds one more room of `room_type`
    ///
    /// `max_available` is the availability the listing showed; the cart
    /// refuses to exceed it or the overall item limit without calling the
    /// server.
    ///
    /// # Errors
    ///
    /// [`BookingError::LimitExceeded`], [`BookingError::Capacity`],
    /// [`BookingError::LockConflict`], [`BookingError::Network`],
    /// [`BookingError::NoActiveSession`] or [`BookingError::Expired`].
    pub async fn increase(&self, room_type: RoomTypeId, max_available: u32) -> Result<HoldId, BookingError> {
        let request = RequestId::new();
        match self
            .command(request, CartAction::Increase {
                request,
                room_type,
                max_available,
            })
            .await?
        {
            CartOutcome::Added(hold_id) => Ok(hold_id),
            other => Err(BookingError::InconsistentState(format!(
                "increase settled as {other:?}"
            ))),
        }
    }

    /// Releases the most recent room of `room_type`
    ///
    /// Returns the released hold, or `None` if the cart had none of that type.
    ///
    /// # Errors
    ///
    /// Server errors from the release (the hold stays in the cart), or
    /// [`BookingError::NoActiveSession`] / [`BookingError::Expired`].
    pub async fn decrease(&self, room_type: RoomTypeId) -> Result<Option<HoldId>, BookingError> {
        let request = RequestId::new();
        match self
            .command(request, CartAction::Decrease { request, room_type })
            .await?
        {
            CartOutcome::Removed(hold_id) => Ok(Some(hold_id)),
            CartOutcome::Unchanged => Ok(None),
            CartOutcome::Added(hold_id) => Err(BookingError::InconsistentState(format!(
                "decrease settled by adding {hold_id}"
            ))),
        }
    }

    /// Abandons the active session and releases its holds in the background
    pub async fn reset_session(&self) {
        self.controller.reset().await;
    }

    /// Completes checkout and hands over the holds
    ///
    /// # Errors
    ///
    /// [`BookingError::NoActiveSession`] / [`BookingError::Expired`].
    pub async fn complete_checkout(&self) -> Result<Vec<Hold>, BookingError> {
        self.controller.complete_checkout().await
    }

    /// Prices the holds currently in the cart
    ///
    /// # Errors
    ///
    /// Returns the server's error.
    pub async fn summary(&self) -> Result<BookingSummary, BookingError> {
        let hold_ids = self.cart.state(|state| state.cart.held_ids()).await;
        self.holds.summary(hold_ids).await
    }

    /// Current cart
    pub async fn cart(&self) -> Cart {
        self.cart.state(|state| state.cart.clone()).await
    }

    /// Cart total for the session's nights; zero without a session
    pub async fn total_price(&self) -> Money {
        let nights = self
            .context
            .snapshot()
            .session
            .map_or(0, |session| session.dates.nights());
        self.cart.state(|state| state.cart.total_price(nights)).await
    }

    /// Holds the server has granted to this checkout
    #[must_use]
    pub fn roster(&self) -> Vec<Hold> {
        self.holds.roster_snapshot()
    }

    /// Checkout phase
    #[must_use]
    pub fn phase(&self) -> CheckoutPhase {
        self.context.phase()
    }

    /// Countdown updates
    #[must_use]
    pub fn subscribe_countdown(&self) -> watch::Receiver<ClockState> {
        self.countdown.subscribe()
    }

    /// Cart updates
    #[must_use]
    pub fn subscribe_cart(&self) -> watch::Receiver<CartState> {
        self.cart.subscribe_state()
    }

    /// Session updates
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionSlot> {
        self.context.subscribe()
    }

    /// Stops the countdown and waits for in-flight cart calls
    ///
    /// # Errors
    ///
    /// [`BookingError::Network`] if cart calls are still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), BookingError> {
        if let Some(listener) = self
            .expiry_listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        self.countdown.stop();
        self.cart.shutdown(timeout).await.map_err(|error| {
            tracing::error!(%error, "Cart did not drain before shutdown");
            BookingError::Network(error.to_string())
        })
    }

    async fn command(&self, request: RequestId, action: CartAction) -> Result<CartOutcome, BookingError> {
        let settled = self
            .cart
            .send_and_wait_for(action, |a| a.settles(request), self.command_timeout)
            .await?;
        match settled {
            CartAction::Settled { outcome, .. } => outcome,
            other => Err(BookingError::InconsistentState(format!(
                "expected a settlement, got {other:?}"
            ))),
        }
    }
}

impl Drop for BookingCoordinator {
    fn drop(&mut self) {
        if let Some(listener) = self
            .expiry_listener
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}
