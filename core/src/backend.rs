//! Contract of the remote reservation service.
//!
//! The server owns the inventory and the allocation/locking algorithm; the
//! coordinator only talks to it through [`ReservationBackend`]. Every method
//! maps transport and protocol failures onto [`BookingError`]:
//!
//! | server answer | error |
//! |---|---|
//! | 400 bad dates | `Validation` |
//! | 404 type / inventory not found | `Capacity` |
//! | 409 unit locked by someone else | `LockConflict` |
//! | 409 nothing left for the dates | `Capacity` |
//! | transport failure, 5xx, timeout | `Network` |

use crate::error::BookingError;
use crate::types::{HoldId, Money, RoomTypeId, SessionId, StayDates};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by backend calls
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BookingError>> + Send + 'a>>;

/// Answer to `createSession`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    /// Identifier of the new session
    pub session_id: SessionId,
    /// Deadline exactly as the server sent it (RFC 3339 expected)
    ///
    /// Kept raw so the countdown can apply its fallback when the server
    /// sends something unusable.
    pub expires_at: String,
}

/// Arguments of `acquireHold`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    /// Session the hold is taken for
    pub session_id: SessionId,
    /// Room type to hold one unit of
    pub room_type: RoomTypeId,
    /// Dates to hold it for
    pub dates: StayDates,
    /// Requested hold expiry
    pub expires_at: DateTime<Utc>,
}

/// Answer to `acquireHold`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldGrant {
    /// Identifier of the new hold
    pub hold_id: HoldId,
    /// Expiry the server actually applied, if it reported one
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Price per night
    pub unit_price: Money,
}

impl HoldGrant {
    /// Expiry to record on the hold
    ///
    /// The server's value wins when it parses; otherwise the requested expiry
    /// is assumed.
    #[must_use]
    pub fn resolve_expiry(&self, requested: DateTime<Utc>) -> DateTime<Utc> {
        self.expires_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map_or(requested, |parsed| parsed.with_timezone(&Utc))
    }
}

/// Answer to `getSummary`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    /// Sum before tax
    pub subtotal: Money,
    /// Tax amount
    pub tax: Money,
    /// Amount due
    pub total: Money,
}

/// The reservation service as seen by the coordinator
///
/// Implementations must be cheap to share (`Arc<dyn ReservationBackend>`).
/// Calls may hang; callers bound every call with their own timeout.
pub trait ReservationBackend: Send + Sync {
    /// Opens a booking session for the given dates
    fn create_session(&self, dates: StayDates) -> BackendFuture<'_, SessionGrant>;

    /// Holds one unit of a room type
    fn acquire_hold(&self, request: HoldRequest) -> BackendFuture<'_, HoldGrant>;

    /// Releases one hold
    fn release_hold(&self, hold_id: HoldId) -> BackendFuture<'_, ()>;

    /// Releases every hold of a session
    fn release_all_holds(&self, session_id: SessionId) -> BackendFuture<'_, ()>;

    /// Prices a set of holds
    fn summary(&self, hold_ids: Vec<HoldId>) -> BackendFuture<'_, BookingSummary>;
}
