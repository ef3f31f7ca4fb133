//! Recovery Controller: optimistic cart changes with a symmetric undo.
//!
//! Every cart mutation backed by a network call is a [`CartMutation`]. The
//! ledger applies it before the call, forgets it when the call succeeds and
//! rolls it back exactly when the call fails. A rollback that cannot restore
//! the prior state reports [`BookingError::InconsistentState`].
//!
//! Acquires only reserve a slot before the call, so a refused acquire never
//! shows in the cart. Releases pop the hold id before the call and push it
//! back if the server refuses.

use roomhold_core::BookingError;
use roomhold_core::types::{Cart, Hold, HoldId, Money, RoomTypeId};
use roomhold_runtime::metrics::HoldMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Correlates a cart command with the actions its effects produce
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reversible cart change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartMutation {
    /// Reserve a slot for an acquire in flight
    Acquire {
        /// Room type being acquired
        room_type: RoomTypeId,
    },
    /// Take the most recent hold of a type out of the cart
    Release {
        /// Room type being released
        room_type: RoomTypeId,
        /// Hold being released
        hold_id: HoldId,
        /// Price to restore the entry with
        unit_price: Money,
    },
}

impl CartMutation {
    /// Room type the mutation touches
    #[must_use]
    pub const fn room_type(&self) -> &RoomTypeId {
        match self {
            Self::Acquire { room_type } | Self::Release { room_type, .. } => room_type,
        }
    }

    /// Applies the optimistic change
    ///
    /// # Errors
    ///
    /// [`BookingError::InconsistentState`] if the hold to release is not the
    /// most recent of its type. The cart is left unchanged.
    pub fn apply(&self, cart: &mut Cart) -> Result<(), BookingError> {
        match self {
            Self::Acquire { room_type } => {
                cart.reserve_slot(room_type);
                Ok(())
            },
            Self::Release {
                room_type, hold_id, ..
            } => match cart.pop_hold(room_type) {
                Some((popped, _)) if &popped == hold_id => Ok(()),
                Some((popped, price)) => {
                    cart.push_hold(room_type, popped.clone(), price);
                    Err(BookingError::InconsistentState(format!(
                        "expected {hold_id} to be the latest {room_type} hold, found {popped}"
                    )))
                },
                None => Err(BookingError::InconsistentState(format!(
                    "no {room_type} hold to release"
                ))),
            },
        }
    }

    /// Reverts [`CartMutation::apply`]
    ///
    /// # Errors
    ///
    /// [`BookingError::InconsistentState`] if the cart no longer looks like the
    /// mutation left it.
    pub fn rollback(&self, cart: &mut Cart) -> Result<(), BookingError> {
        match self {
            Self::Acquire { room_type } => {
                if cart.release_slot(room_type) {
                    Ok(())
                } else {
                    Err(BookingError::InconsistentState(format!(
                        "no slot reserved for {room_type}"
                    )))
                }
            },
            Self::Release {
                room_type,
                hold_id,
                unit_price,
            } => {
                if cart.contains(hold_id) {
                    return Err(BookingError::InconsistentState(format!(
                        "{hold_id} is already back in the cart"
                    )));
                }
                cart.push_hold(room_type, hold_id.clone(), *unit_price);
                Ok(())
            },
        }
    }
}

/// Outstanding optimistic mutations, keyed by request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryLedger {
    outstanding: BTreeMap<RequestId, CartMutation>,
}

impl RecoveryLedger {
    /// Applies `mutation` and records it under `request`
    ///
    /// # Errors
    ///
    /// Propagates [`CartMutation::apply`] failures; nothing is recorded.
    pub fn begin(&mut self, request: RequestId, mutation: CartMutation, cart: &mut Cart) -> Result<(), BookingError> {
        mutation.apply(cart)?;
        self.outstanding.insert(request, mutation);
        Ok(())
    }

    /// Number of mutations awaiting their outcome
    #[must_use]
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// Whether no mutation is awaiting its outcome
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Keeps the change of a successful acquire: the slot becomes the hold
    ///
    /// Returns `false` if `request` was not outstanding.
    pub fn confirm_acquire(&mut self, request: &RequestId, hold: &Hold, cart: &mut Cart) -> bool {
        match self.outstanding.remove(request) {
            Some(CartMutation::Acquire { room_type }) => {
                cart.release_slot(&room_type);
                cart.push_hold(&room_type, hold.id.clone(), hold.unit_price);
                true
            },
            Some(other) => {
                // Not an acquire: leave it for its own outcome
                self.outstanding.insert(*request, other);
                false
            },
            None => false,
        }
    }

    /// Keeps the change of a successful release
    ///
    /// Returns `false` if `request` was not outstanding.
    pub fn confirm_release(&mut self, request: &RequestId) -> bool {
        self.outstanding.remove(request).is_some()
    }

    /// Reverts the change recorded for a failed call
    ///
    /// Returns `Ok(false)` if `request` was not outstanding (nothing to undo).
    ///
    /// # Errors
    ///
    /// [`BookingError::InconsistentState`] if the rollback could not restore
    /// the prior state.
    pub fn roll_back(&mut self, request: &RequestId, cart: &mut Cart) -> Result<bool, BookingError> {
        let Some(mutation) = self.outstanding.remove(request) else {
            return Ok(false);
        };
        HoldMetrics::record_rollback();
        mutation.rollback(cart).map_err(|error| {
            tracing::error!(%request, %error, "Rollback could not restore the cart");
            error
        })?;
        tracing::warn!(%request, room_type = %mutation.room_type(), "Rolled back cart change");
        Ok(true)
    }

    /// Forgets every outstanding mutation, e.g. when the cart is cleared
    pub fn abandon_all(&mut self) {
        self.outstanding.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn deluxe() -> RoomTypeId {
        RoomTypeId::new("Deluxe")
    }

    fn cart_with(ids: &[&str]) -> Cart {
        let mut cart = Cart::new();
        for id in ids {
            cart.push_hold(&deluxe(), HoldId::new(*id), Money::from_cents(12_000));
        }
        cart
    }

    fn release(id: &str) -> CartMutation {
        CartMutation::Release {
            room_type: deluxe(),
            hold_id: HoldId::new(id),
            unit_price: Money::from_cents(12_000),
        }
    }

    #[test]
    fn test_release_rollback_restores_exact_entry() {
        let mut cart = cart_with(&["h1"]);
        let before = cart.clone();
        let mut ledger = RecoveryLedger::default();
        let request = RequestId::new();

        ledger.begin(request, release("h1"), &mut cart).unwrap();
        assert!(cart.entry(&deluxe()).is_none());

        assert!(ledger.roll_back(&request, &mut cart).unwrap());
        assert_eq!(cart, before);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_acquire_reserves_but_shows_nothing() {
        let mut cart = Cart::new();
        let mut ledger = RecoveryLedger::default();
        let request = RequestId::new();

        ledger
            .begin(request, CartMutation::Acquire { room_type: deluxe() }, &mut cart)
            .unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.reserved_count(), 1);

        ledger.roll_back(&request, &mut cart).unwrap();
        assert_eq!(cart, Cart::new());
    }

    #[test]
    fn test_release_of_non_latest_hold_is_refused() {
        let mut cart = cart_with(&["h1", "h2"]);
        let before = cart.clone();
        let err = release("h1").apply(&mut cart).unwrap_err();
        assert!(matches!(err, BookingError::InconsistentState(_)));
        assert_eq!(cart, before);
    }

    #[test]
    fn test_double_rollback_is_inconsistent() {
        let mut cart = cart_with(&["h1"]);
        let mutation = release("h1");
        mutation.apply(&mut cart).unwrap();
        mutation.rollback(&mut cart).unwrap();
        assert!(matches!(
            mutation.rollback(&mut cart),
            Err(BookingError::InconsistentState(_))
        ));
    }

    #[test]
    fn test_unknown_request_has_nothing_to_undo() {
        let mut cart = cart_with(&["h1"]);
        let mut ledger = RecoveryLedger::default();
        assert!(!ledger.roll_back(&RequestId::new(), &mut cart).unwrap());
        assert_eq!(cart.total_count(), 1);
    }
}
