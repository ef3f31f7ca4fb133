//! Domain types for the room-hold booking coordinator.
//!
//! Value objects (identifiers, stay dates, money), the entities the server
//! hands out (`BookingSession`, `Hold`) and the client-side aggregates built
//! on top of them (`Cart`, `ClockState`).

use crate::error::BookingError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of rooms a single checkout may hold across all room types
pub const MAX_ITEMS: u32 = 5;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a room type (the item type a cart entry aggregates)
    RoomTypeId
);

string_id!(
    /// Server-issued identifier of a single inventory hold
    HoldId
);

string_id!(
    /// Server-issued identifier of a booking session
    SessionId
);

// ============================================================================
// Money
// ============================================================================

/// An amount of money in the smallest currency unit (cents)
///
/// Integer arithmetic keeps totals exact; formatting and rounding belong to
/// the presentation layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Multiplies by a quantity, saturating at `u64::MAX` cents
    #[must_use]
    pub const fn times(self, quantity: u64) -> Self {
        Self(self.0.saturating_mul(quantity))
    }

    /// Adds two amounts, saturating at `u64::MAX` cents
    #[must_use]
    pub const fn plus(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Stay dates
// ============================================================================

/// A validated check-in / check-out pair
///
/// Construction guarantees `check_in < check_out`, so `nights()` is always
/// at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StayDates {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

impl StayDates {
    /// Creates a stay, rejecting empty or inverted ranges
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] unless `check_in < check_out`.
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, BookingError> {
        if check_in >= check_out {
            return Err(BookingError::Validation(format!(
                "check-in {check_in} must be before check-out {check_out}"
            )));
        }
        Ok(Self { check_in, check_out })
    }

    /// Parses ISO-8601 calendar dates (`YYYY-MM-DD`)
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] for unparseable or inverted dates.
    pub fn parse(check_in: &str, check_out: &str) -> Result<Self, BookingError> {
        let parse = |label: &str, raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                BookingError::Validation(format!("invalid {label} date {raw:?}: {e}"))
            })
        };
        Self::new(parse("check-in", check_in)?, parse("check-out", check_out)?)
    }

    /// Rejects stays that start before `today`
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] if check-in is in the past.
    pub fn ensure_not_past(&self, today: NaiveDate) -> Result<(), BookingError> {
        if self.check_in < today {
            return Err(BookingError::Validation(format!(
                "check-in {} is in the past (today is {today})",
                self.check_in
            )));
        }
        Ok(())
    }

    /// Check-in date
    #[must_use]
    pub const fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    /// Check-out date
    #[must_use]
    pub const fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    /// Number of nights in the stay
    #[must_use]
    pub fn nights(&self) -> u32 {
        let days = (self.check_out - self.check_in).num_days();
        u32::try_from(days).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for StayDates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.check_in, self.check_out)
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Lifecycle status of a booking session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Holds may be acquired and released
    Active,
    /// The countdown reached zero
    Expired,
    /// Checkout completed; the holds became a booking
    Consumed,
    /// The customer abandoned the session
    Reset,
}

impl SessionStatus {
    /// Whether the status is a terminal one
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Overall checkout phase exposed to the UI
///
/// Same as [`SessionStatus`] plus the phase before any session exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckoutPhase {
    /// No session has been started yet
    #[default]
    Uninitialized,
    /// A session is running
    Active,
    /// The last session expired
    Expired,
    /// The last session was consumed by a completed checkout
    Consumed,
    /// The last session was reset
    Reset,
}

impl From<SessionStatus> for CheckoutPhase {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Active => Self::Active,
            SessionStatus::Expired => Self::Expired,
            SessionStatus::Consumed => Self::Consumed,
            SessionStatus::Reset => Self::Reset,
        }
    }
}

/// The umbrella object of one checkout attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSession {
    /// Server-issued identifier
    pub id: SessionId,
    /// Dates every hold of this session is bound to
    pub dates: StayDates,
    /// Deadline driving the countdown
    pub expires_at: DateTime<Utc>,
    /// Current status
    pub status: SessionStatus,
}

impl BookingSession {
    /// Whether the session still permits hold mutations
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

// ============================================================================
// Holds
// ============================================================================

/// A time-bounded reservation of one room of a given type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Server-issued identifier
    pub id: HoldId,
    /// Room type the hold is for
    pub room_type: RoomTypeId,
    /// Session that owns the hold
    pub session_id: SessionId,
    /// Dates the room is held for
    pub dates: StayDates,
    /// When the server will drop the hold on its own
    pub expires_at: DateTime<Utc>,
    /// Price per night
    pub unit_price: Money,
}

// ============================================================================
// Cart
// ============================================================================

/// The client's aggregation of held rooms of one type
///
/// The count is derived from the held ids, so `count == held_ids.len()`
/// holds by construction. Ids are kept in acquisition order; the last one is
/// the next to be released.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    /// Room type this entry aggregates
    pub room_type: RoomTypeId,
    /// Price per night of one room
    pub unit_price: Money,
    held_ids: Vec<HoldId>,
}

impl CartEntry {
    /// Creates an empty entry
    #[must_use]
    pub const fn new(room_type: RoomTypeId, unit_price: Money) -> Self {
        Self {
            room_type,
            unit_price,
            held_ids: Vec::new(),
        }
    }

    /// Number of rooms held
    #[must_use]
    pub fn count(&self) -> u32 {
        u32::try_from(self.held_ids.len()).unwrap_or(u32::MAX)
    }

    /// Held ids in acquisition order
    #[must_use]
    pub fn held_ids(&self) -> &[HoldId] {
        &self.held_ids
    }

    /// Most recently acquired hold
    #[must_use]
    pub fn last_held(&self) -> Option<&HoldId> {
        self.held_ids.last()
    }

    /// `unit_price × nights × count`
    #[must_use]
    pub fn subtotal(&self, nights: u32) -> Money {
        self.unit_price
            .times(u64::from(nights))
            .times(u64::from(self.count()))
    }
}

/// Mapping of room type to cart entry
///
/// Besides the visible entries the cart tracks slots reserved by acquires
/// that are still in flight. Reserved slots count against [`MAX_ITEMS`] but
/// never appear in an entry until the server confirms the hold.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    entries: BTreeMap<RoomTypeId, CartEntry>,
    #[serde(skip)]
    reserved: BTreeMap<RoomTypeId, u32>,
}

impl Cart {
    /// Creates an empty cart
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for a room type
    #[must_use]
    pub fn entry(&self, room_type: &RoomTypeId) -> Option<&CartEntry> {
        self.entries.get(room_type)
    }

    /// All entries, ordered by room type
    pub fn entries(&self) -> impl Iterator<Item = &CartEntry> {
        self.entries.values()
    }

    /// Whether no room is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rooms held of one type
    #[must_use]
    pub fn count_for(&self, room_type: &RoomTypeId) -> u32 {
        self.entries.get(room_type).map_or(0, CartEntry::count)
    }

    /// Rooms held across all types
    #[must_use]
    pub fn total_count(&self) -> u32 {
        self.entries.values().map(CartEntry::count).sum()
    }

    /// Slots reserved by in-flight acquires of one type
    #[must_use]
    pub fn reserved_for(&self, room_type: &RoomTypeId) -> u32 {
        self.reserved.get(room_type).copied().unwrap_or(0)
    }

    /// Slots reserved by in-flight acquires across all types
    #[must_use]
    pub fn reserved_count(&self) -> u32 {
        self.reserved.values().sum()
    }

    /// `Σ unit_price × nights × count` over all entries, unrounded
    #[must_use]
    pub fn total_price(&self, nights: u32) -> Money {
        self.entries
            .values()
            .fold(Money::ZERO, |total, entry| total.plus(entry.subtotal(nights)))
    }

    /// Every held id, grouped by room type in acquisition order
    #[must_use]
    pub fn held_ids(&self) -> Vec<HoldId> {
        self.entries
            .values()
            .flat_map(|entry| entry.held_ids.iter().cloned())
            .collect()
    }

    /// Checks the selection policy for adding one room of `room_type`
    ///
    /// # Errors
    ///
    /// - [`BookingError::LimitExceeded`] when the cart (including in-flight
    ///   acquires) already holds [`MAX_ITEMS`] rooms
    /// - [`BookingError::Capacity`] when this type already holds
    ///   `max_available` rooms
    pub fn check_can_add(&self, room_type: &RoomTypeId, max_available: u32) -> Result<(), BookingError> {
        if self.total_count() + self.reserved_count() >= MAX_ITEMS {
            return Err(BookingError::LimitExceeded { max: MAX_ITEMS });
        }
        if self.count_for(room_type) + self.reserved_for(room_type) >= max_available {
            return Err(BookingError::Capacity(format!(
                "only {max_available} room(s) of type {room_type} available"
            )));
        }
        Ok(())
    }

    /// Reserves a slot for an acquire about to be issued
    pub fn reserve_slot(&mut self, room_type: &RoomTypeId) {
        *self.reserved.entry(room_type.clone()).or_insert(0) += 1;
    }

    /// Gives back a reserved slot; returns `false` if none was reserved
    pub fn release_slot(&mut self, room_type: &RoomTypeId) -> bool {
        match self.reserved.get_mut(room_type) {
            Some(slots) if *slots > 1 => {
                *slots -= 1;
                true
            }
            Some(_) => {
                self.reserved.remove(room_type);
                true
            }
            None => false,
        }
    }

    /// Appends a hold id as the most recent of its type
    pub fn push_hold(&mut self, room_type: &RoomTypeId, hold_id: HoldId, unit_price: Money) {
        self.entries
            .entry(room_type.clone())
            .or_insert_with(|| CartEntry::new(room_type.clone(), unit_price))
            .held_ids
            .push(hold_id);
    }

    /// Removes the most recent hold id of a type, dropping the entry when it empties
    pub fn pop_hold(&mut self, room_type: &RoomTypeId) -> Option<(HoldId, Money)> {
        let entry = self.entries.get_mut(room_type)?;
        let popped = entry.held_ids.pop().map(|id| (id, entry.unit_price));
        if entry.held_ids.is_empty() {
            self.entries.remove(room_type);
        }
        popped
    }

    /// Whether a hold id is referenced by any entry
    #[must_use]
    pub fn contains(&self, hold_id: &HoldId) -> bool {
        self.entries
            .values()
            .any(|entry| entry.held_ids.contains(hold_id))
    }

    /// Empties every entry and reservation
    pub fn clear(&mut self) {
        self.entries.clear();
        self.reserved.clear();
    }
}

// ============================================================================
// Countdown
// ============================================================================

/// Status of the countdown clock
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockStatus {
    /// No deadline is being tracked
    #[default]
    Uninitialized,
    /// Ticking towards the deadline
    Running,
    /// Reached zero; the expiry signal has fired
    Expired,
}

/// Snapshot of the countdown clock
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    /// Deadline being counted down to
    pub deadline: Option<DateTime<Utc>>,
    /// Whole seconds left, rounded up
    pub remaining_seconds: u64,
    /// Current status
    pub status: ClockStatus,
}
