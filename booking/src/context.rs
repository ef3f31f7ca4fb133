//! The explicit handle shared by every component of one checkout.
//!
//! The session controller is the only writer. Holds and the cart read it to
//! decide whether a mutation is still allowed and whether a late answer from
//! the server belongs to the current session.

use roomhold_core::BookingError;
use roomhold_core::types::{BookingSession, CheckoutPhase, SessionId, SessionStatus};
use std::sync::Arc;
use tokio::sync::watch;

/// What the context knows about the current checkout
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSlot {
    /// Phase exposed to the UI
    pub phase: CheckoutPhase,
    /// Latest session, active or not
    pub session: Option<BookingSession>,
    /// Countdown run started for the session
    pub countdown_run: Option<u64>,
    /// Set while the active session is being dismantled; no mutation may start
    pub tearing_down: bool,
}

impl SessionSlot {
    /// Session that currently permits hold mutations
    #[must_use]
    pub fn active(&self) -> Option<&BookingSession> {
        if self.tearing_down || self.phase != CheckoutPhase::Active {
            return None;
        }
        self.session.as_ref().filter(|s| s.is_active())
    }

    /// Error explaining why no mutation is allowed right now
    #[must_use]
    pub const fn inactive_error(&self) -> BookingError {
        match self.phase {
            CheckoutPhase::Expired => BookingError::Expired,
            _ => BookingError::NoActiveSession,
        }
    }
}

/// Shared, cloneable view of the current booking session
#[derive(Clone, Debug)]
pub struct BookingSessionContext {
    slot: Arc<watch::Sender<SessionSlot>>,
}

impl Default for BookingSessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingSessionContext {
    /// A context with no session
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(SessionSlot::default());
        Self { slot: Arc::new(slot) }
    }

    /// Copy of the current slot
    #[must_use]
    pub fn snapshot(&self) -> SessionSlot {
        self.slot.borrow().clone()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> CheckoutPhase {
        self.slot.borrow().phase
    }

    /// Session that currently permits hold mutations
    ///
    /// # Errors
    ///
    /// [`BookingError::Expired`] after an expiry, otherwise
    /// [`BookingError::NoActiveSession`].
    pub fn require_active(&self) -> Result<BookingSession, BookingError> {
        let slot = self.slot.borrow();
        slot.active().cloned().ok_or_else(|| slot.inactive_error())
    }

    /// Whether `session_id` is the session that currently permits mutations
    #[must_use]
    pub fn is_current(&self, session_id: &SessionId) -> bool {
        self.slot.borrow().active().is_some_and(|s| &s.id == session_id)
    }

    /// Countdown run tied to the active session
    #[must_use]
    pub fn countdown_run(&self) -> Option<u64> {
        self.slot.borrow().countdown_run
    }

    /// Subscribes to slot changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSlot> {
        self.slot.subscribe()
    }

    /// Makes `session` the active one
    pub(crate) fn activate(&self, session: BookingSession, countdown_run: u64) {
        self.slot.send_replace(SessionSlot {
            phase: CheckoutPhase::Active,
            session: Some(session),
            countdown_run: Some(countdown_run),
            tearing_down: false,
        });
    }

    /// Blocks new mutations while the active session is dismantled
    ///
    /// Returns the session being dismantled, if one was active.
    pub(crate) fn begin_teardown(&self) -> Option<BookingSession> {
        let mut dismantled = None;
        self.slot.send_modify(|slot| {
            dismantled = slot.active().cloned();
            if dismantled.is_some() {
                slot.tearing_down = true;
            }
        });
        dismantled
    }

    /// Ends the current session with a terminal status
    ///
    /// Returns the ended session if it was still running.
    pub(crate) fn end(&self, status: SessionStatus) -> Option<BookingSession> {
        debug_assert!(status.is_terminal());
        let mut ended = None;
        self.slot.send_modify(|slot| {
            if let Some(session) = slot.session.as_mut().filter(|s| s.is_active()) {
                session.status = status;
                ended = Some(session.clone());
            }
            slot.phase = status.into();
            slot.countdown_run = None;
            slot.tearing_down = false;
        });
        ended
    }
}
