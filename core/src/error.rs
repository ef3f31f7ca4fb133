//! Error taxonomy of the booking coordinator.
//!
//! Every failure a caller can observe is one of these variants. They are
//! `Clone` and serializable because they travel inside actions fed back by
//! effects and are broadcast to observers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the session, hold and cart operations
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingError {
    /// Malformed or illogical input (dates, ids). Never retried automatically.
    #[error("invalid booking request: {0}")]
    Validation(String),

    /// No inventory left for the requested room type and dates
    #[error("no availability: {0}")]
    Capacity(String),

    /// The cart already holds the maximum number of rooms
    #[error("cannot hold more than {max} rooms in one booking")]
    LimitExceeded {
        /// Maximum number of rooms per booking
        max: u32,
    },

    /// The unit is momentarily held by another customer; the caller may retry
    #[error("room is being held by another customer: {0}")]
    LockConflict(String),

    /// Transport failure or timeout talking to the reservation service
    #[error("reservation service unreachable: {0}")]
    Network(String),

    /// The session countdown reached zero and the session was torn down
    #[error("booking session expired")]
    Expired,

    /// A rollback could not restore the exact prior state; local state is untrusted
    #[error("local booking state is inconsistent, please refresh: {0}")]
    InconsistentState(String),

    /// A hold mutation was attempted without an active session
    #[error("no active booking session")]
    NoActiveSession,
}

impl BookingError {
    /// Whether an automatic retry may succeed
    ///
    /// Only transport failures qualify; lock conflicts are left to the user.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Short machine-readable label, used as a metrics dimension
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Capacity(_) => "capacity",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::LockConflict(_) => "lock_conflict",
            Self::Network(_) => "network",
            Self::Expired => "expired",
            Self::InconsistentState(_) => "inconsistent_state",
            Self::NoActiveSession => "no_active_session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_retryable() {
        assert!(BookingError::Network("reset by peer".into()).is_retryable());
        assert!(!BookingError::LockConflict("taken".into()).is_retryable());
        assert!(!BookingError::Capacity("sold out".into()).is_retryable());
        assert!(!BookingError::Expired.is_retryable());
    }

    #[test]
    fn test_limit_message_names_the_limit() {
        let err = BookingError::LimitExceeded { max: 5 };
        assert_eq!(err.to_string(), "cannot hold more than 5 rooms in one booking");
        assert_eq!(err.kind(), "limit_exceeded");
    }
}
