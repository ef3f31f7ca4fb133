//! Cart Aggregator: the cart of held rooms as a reducer.
//!
//! Commands (`Increase`, `Decrease`, `Clear`) come from the UI; the hold
//! outcomes come back from effects. Each command ends with exactly one
//! [`CartAction::Settled`] carrying its request id, which is what callers
//! wait for.
//!
//! # Sequencing
//!
//! A room type has at most one acquire or release in flight. Commands for a
//! busy type wait in a FIFO queue and start when the in-flight one settles;
//! different types proceed concurrently. In-flight acquires hold a reserved
//! slot, so concurrent increases across types cannot exceed [`MAX_ITEMS`].

use crate::config::HoldExpiryPolicy;
use crate::context::BookingSessionContext;
use crate::holds::HoldManager;
use crate::recovery::{CartMutation, RecoveryLedger, RequestId};
use roomhold_core::backend::HoldRequest;
use roomhold_core::effect::Effect;
use roomhold_core::environment::Clock;
use roomhold_core::reducer::Reducer;
use roomhold_core::types::{Cart, Hold, HoldId, MAX_ITEMS, RoomTypeId};
use roomhold_core::{BookingError, SmallVec, smallvec};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// How a cart command ended, when it succeeded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartOutcome {
    /// A hold was acquired and added
    Added(HoldId),
    /// A hold was released and removed
    Removed(HoldId),
    /// Nothing to do (decrease of an empty entry)
    Unchanged,
}

/// Actions of the cart reducer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartAction {
    // Commands
    /// Hold one more room of a type
    Increase {
        /// Correlation id
        request: RequestId,
        /// Room type to add
        room_type: RoomTypeId,
        /// Rooms of this type the listing says are available
        max_available: u32,
    },
    /// Release the most recent room of a type
    Decrease {
        /// Correlation id
        request: RequestId,
        /// Room type to remove
        room_type: RoomTypeId,
    },
    /// Empty the cart without calling the server
    Clear,

    // Hold outcomes
    /// The server granted a hold
    HoldAcquired {
        /// Correlation id
        request: RequestId,
        /// The new hold
        hold: Hold,
    },
    /// The server refused a hold
    AcquireFailed {
        /// Correlation id
        request: RequestId,
        /// Room type requested
        room_type: RoomTypeId,
        /// Why
        error: BookingError,
    },
    /// The server released a hold
    HoldReleased {
        /// Correlation id
        request: RequestId,
        /// Room type released
        room_type: RoomTypeId,
        /// Hold released
        hold_id: HoldId,
    },
    /// The server refused to release a hold
    ReleaseFailed {
        /// Correlation id
        request: RequestId,
        /// Room type
        room_type: RoomTypeId,
        /// Hold that is still held
        hold_id: HoldId,
        /// Why
        error: BookingError,
    },

    // Terminal
    /// A command finished
    Settled {
        /// Correlation id of the command
        request: RequestId,
        /// Result handed back to the caller
        outcome: Result<CartOutcome, BookingError>,
    },
}

impl CartAction {
    /// Correlation id of a command, if it has one
    #[must_use]
    pub const fn request(&self) -> Option<RequestId> {
        match self {
            Self::Clear => None,
            Self::Increase { request, .. }
            | Self::Decrease { request, .. }
            | Self::HoldAcquired { request, .. }
            | Self::AcquireFailed { request, .. }
            | Self::HoldReleased { request, .. }
            | Self::ReleaseFailed { request, .. }
            | Self::Settled { request, .. } => Some(*request),
        }
    }

    /// Whether this is the `Settled` action for `request`
    #[must_use]
    pub fn settles(&self, request: RequestId) -> bool {
        matches!(self, Self::Settled { request: r, .. } if *r == request)
    }

    const fn command_room_type(&self) -> Option<&RoomTypeId> {
        match self {
            Self::Increase { room_type, .. } | Self::Decrease { room_type, .. } => Some(room_type),
            _ => None,
        }
    }
}

/// State of the cart reducer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CartState {
    /// The cart shown to the customer
    pub cart: Cart,
    /// Most recent failure, cleared by the next success
    pub last_error: Option<BookingError>,
    ledger: RecoveryLedger,
    in_flight: BTreeMap<RoomTypeId, RequestId>,
    queued: BTreeMap<RoomTypeId, VecDeque<CartAction>>,
}

impl CartState {
    /// Whether a call is in flight for `room_type`
    #[must_use]
    pub fn is_busy(&self, room_type: &RoomTypeId) -> bool {
        self.in_flight.contains_key(room_type)
    }

    /// Commands waiting behind an in-flight call
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued.values().map(VecDeque::len).sum()
    }

    /// Optimistic mutations awaiting their outcome
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.ledger.len()
    }

    fn finish(&mut self, room_type: &RoomTypeId, request: RequestId) {
        if self.in_flight.get(room_type) == Some(&request) {
            self.in_flight.remove(room_type);
        }
    }
}

/// Dependencies of the cart reducer
#[derive(Clone)]
pub struct CartEnvironment {
    /// Hold Manager performing the calls
    pub holds: HoldManager,
    /// Session the cart belongs to
    pub context: BookingSessionContext,
    /// Clock for hold expiry
    pub clock: Arc<dyn Clock>,
    /// Expiry requested for new holds
    pub expiry_policy: HoldExpiryPolicy,
}

/// Reducer of the cart
#[derive(Clone, Copy, Debug, Default)]
pub struct CartReducer;

type Effects = SmallVec<[Effect<CartAction>; 4]>;

fn settle(request: RequestId, outcome: Result<CartOutcome, BookingError>) -> Effect<CartAction> {
    Effect::send(CartAction::Settled { request, outcome })
}

impl CartReducer {
    fn increase(
        state: &mut CartState,
        request: RequestId,
        room_type: RoomTypeId,
        max_available: u32,
        env: &CartEnvironment,
    ) -> Effects {
        let session = match env.context.require_active() {
            Ok(session) => session,
            Err(error) => return smallvec![settle(request, Err(error))],
        };

        if let Err(error) = state.cart.check_can_add(&room_type, max_available) {
            tracing::debug!(%room_type, %error, "Increase refused locally");
            return smallvec![settle(request, Err(error))];
        }

        let mutation = CartMutation::Acquire {
            room_type: room_type.clone(),
        };
        if let Err(error) = state.ledger.begin(request, mutation, &mut state.cart) {
            return smallvec![settle(request, Err(error))];
        }
        state.in_flight.insert(room_type.clone(), request);

        let hold_request = HoldRequest {
            expires_at: env.expiry_policy.requested_expiry(&session, env.clock.now()),
            session_id: session.id,
            room_type: room_type.clone(),
            dates: session.dates,
        };
        let holds = env.holds.clone();

        smallvec![Effect::future(async move {
            match holds.acquire(hold_request).await {
                Ok(hold) => CartAction::HoldAcquired { request, hold },
                Err(error) => CartAction::AcquireFailed {
                    request,
                    room_type,
                    error,
                },
            }
        })]
    }

    fn decrease(state: &mut CartState, request: RequestId, room_type: RoomTypeId, env: &CartEnvironment) -> Effects {
        if let Err(error) = env.context.require_active() {
            return smallvec![settle(request, Err(error))];
        }

        let Some(entry) = state.cart.entry(&room_type) else {
            return smallvec![settle(request, Ok(CartOutcome::Unchanged))];
        };
        let Some(hold_id) = entry.last_held().cloned() else {
            return smallvec![settle(request, Ok(CartOutcome::Unchanged))];
        };

        let mutation = CartMutation::Release {
            room_type: room_type.clone(),
            hold_id: hold_id.clone(),
            unit_price: entry.unit_price,
        };
        if let Err(error) = state.ledger.begin(request, mutation, &mut state.cart) {
            tracing::error!(%room_type, %error, "Cart entry out of order");
            return smallvec![settle(request, Err(error))];
        }
        state.in_flight.insert(room_type.clone(), request);

        let holds = env.holds.clone();
        smallvec![Effect::future(async move {
            match holds.release(hold_id.clone()).await {
                Ok(()) => CartAction::HoldReleased {
                    request,
                    room_type,
                    hold_id,
                },
                Err(error) => CartAction::ReleaseFailed {
                    request,
                    room_type,
                    hold_id,
                    error,
                },
            }
        })]
    }

    /// Starts queued commands for `room_type` until one goes in flight
    fn drain_queue(&self, state: &mut CartState, room_type: &RoomTypeId, env: &CartEnvironment, effects: &mut Effects) {
        while !state.is_busy(room_type) {
            let Some(next) = state.queued.get_mut(room_type).and_then(VecDeque::pop_front) else {
                break;
            };
            if state.queued.get(room_type).is_some_and(VecDeque::is_empty) {
                state.queued.remove(room_type);
            }
            effects.extend(self.reduce(state, next, env));
        }
    }
}

impl Reducer for CartReducer {
    type State = CartState;
    type Action = CartAction;
    type Environment = CartEnvironment;

    fn reduce(&self, state: &mut CartState, action: CartAction, env: &CartEnvironment) -> Effects {
        let busy_type = action
            .command_room_type()
            .filter(|room_type| state.is_busy(room_type))
            .cloned();
        if let Some(room_type) = busy_type {
            tracing::debug!(%room_type, "Room type busy, command queued");
            state.queued.entry(room_type).or_default().push_back(action);
            return SmallVec::new();
        }

        match action {
            CartAction::Increase {
                request,
                room_type,
                max_available,
            } => Self::increase(state, request, room_type, max_available, env),

            CartAction::Decrease { request, room_type } => Self::decrease(state, request, room_type, env),

            CartAction::Clear => {
                let error = env.context.snapshot().inactive_error();
                let waiting: Vec<RequestId> = std::mem::take(&mut state.queued)
                    .into_values()
                    .flatten()
                    .filter_map(|command| command.request())
                    .collect();
                state.cart.clear();
                state.ledger.abandon_all();
                state.in_flight.clear();
                tracing::debug!(dropped_commands = waiting.len(), "Cart cleared");

                waiting
                    .into_iter()
                    .map(|request| settle(request, Err(error.clone())))
                    .collect()
            },

            CartAction::HoldAcquired { request, hold } => {
                let room_type = hold.room_type.clone();
                state.finish(&room_type, request);

                let outcome = if state.ledger.confirm_acquire(&request, &hold, &mut state.cart) {
                    debug_assert!(state.cart.total_count() <= MAX_ITEMS);
                    Ok(CartOutcome::Added(hold.id))
                } else {
                    // The cart was cleared meanwhile; the teardown releases the hold
                    Err(env.context.snapshot().inactive_error())
                };

                let mut effects: Effects = smallvec![settle(request, outcome)];
                self.drain_queue(state, &room_type, env, &mut effects);
                effects
            },

            CartAction::AcquireFailed {
                request,
                room_type,
                error,
            } => {
                state.finish(&room_type, request);
                let outcome = match state.ledger.roll_back(&request, &mut state.cart) {
                    Ok(_) => Err(error),
                    Err(inconsistent) => Err(inconsistent),
                };

                let mut effects: Effects = smallvec![settle(request, outcome)];
                self.drain_queue(state, &room_type, env, &mut effects);
                effects
            },

            CartAction::HoldReleased {
                request,
                room_type,
                hold_id,
            } => {
                state.finish(&room_type, request);
                state.ledger.confirm_release(&request);

                let mut effects: Effects = smallvec![settle(request, Ok(CartOutcome::Removed(hold_id)))];
                self.drain_queue(state, &room_type, env, &mut effects);
                effects
            },

            CartAction::ReleaseFailed {
                request,
                room_type,
                hold_id,
                error,
            } => {
                state.finish(&room_type, request);
                let outcome = match state.ledger.roll_back(&request, &mut state.cart) {
                    Ok(_) => Err(error),
                    Err(inconsistent) => Err(inconsistent),
                };
                tracing::debug!(hold = %hold_id, "Release failed");

                let mut effects: Effects = smallvec![settle(request, outcome)];
                self.drain_queue(state, &room_type, env, &mut effects);
                effects
            },

            CartAction::Settled { outcome, .. } => {
                state.last_error = outcome.err();
                SmallVec::new()
            },
        }
    }
}
