//! Configuration management for the booking coordinator.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::{DateTime, Utc};
use roomhold_core::types::BookingSession;
use roomhold_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unknown hold expiry policy name
    #[error("unknown hold expiry policy {0:?} (expected \"session\" or \"independent\")")]
    UnknownHoldExpiry(String),

    /// A duration that must be positive is zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// How the expiry requested for a new hold is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldExpiryPolicy {
    /// Every hold asks to live exactly as long as its session
    #[default]
    InheritSession,
    /// Every hold asks to live `window_secs` from the moment it is acquired
    Independent {
        /// Hold lifetime in seconds
        window_secs: u64,
    },
}

impl HoldExpiryPolicy {
    /// Expiry to request for a hold acquired at `now` in `session`
    #[must_use]
    pub fn requested_expiry(&self, session: &BookingSession, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::InheritSession => session.expires_at,
            Self::Independent { window_secs } => i64::try_from(window_secs)
                .ok()
                .and_then(chrono::TimeDelta::try_seconds)
                .and_then(|window| now.checked_add_signed(window))
                .unwrap_or(session.expires_at),
        }
    }
}

/// Parses the `ROOMHOLD_HOLD_EXPIRY` value; `window_secs` completes `independent`
struct HoldExpiryName(HoldExpiryKind);

#[derive(Clone, Copy)]
enum HoldExpiryKind {
    Session,
    Independent,
}

impl FromStr for HoldExpiryName {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "session" | "inherit" => Ok(Self(HoldExpiryKind::Session)),
            "independent" => Ok(Self(HoldExpiryKind::Independent)),
            _ => Err(ConfigError::UnknownHoldExpiry(raw.to_string())),
        }
    }
}

/// Reservation service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the REST API
    pub url: String,
    /// Bearer token, if the API requires one
    pub token: Option<String>,
    /// Bound on every call in milliseconds
    pub call_timeout_ms: u64,
}

/// Countdown settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountdownConfig {
    /// Window used when the server deadline is unusable, in seconds
    pub fallback_window_secs: u64,
    /// Tick period in milliseconds
    pub tick_interval_ms: u64,
}

/// Hold settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldConfig {
    /// Expiry requested for new holds
    pub expiry: HoldExpiryPolicy,
    /// Retries of the background release-all
    pub release_retries: u32,
    /// Initial backoff between those retries in milliseconds
    pub release_retry_delay_ms: u64,
}

/// Booking coordinator configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Reservation service connection
    pub backend: BackendConfig,
    /// Countdown settings
    pub countdown: CountdownConfig,
    /// Hold settings
    pub holds: HoldConfig,
    /// How long a caller waits for its cart command in milliseconds
    pub command_timeout_ms: u64,
    /// Cart action broadcast buffer
    pub broadcast_capacity: usize,
    /// Prometheus listener address, if metrics should be served
    pub metrics_addr: Option<SocketAddr>,
    /// Log filter
    pub log_level: String,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: "http://localhost:8080/api".to_string(),
                token: None,
                call_timeout_ms: 10_000,
            },
            countdown: CountdownConfig {
                fallback_window_secs: 900, // 15 minutes
                tick_interval_ms: 1_000,
            },
            holds: HoldConfig {
                expiry: HoldExpiryPolicy::InheritSession,
                release_retries: 2,
                release_retry_delay_ms: 200,
            },
            command_timeout_ms: 60_000,
            broadcast_capacity: 256,
            metrics_addr: None,
            log_level: "info".to_string(),
        }
    }
}

impl BookingConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable values fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unknown `ROOMHOLD_HOLD_EXPIRY` or a
    /// zero timeout.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let hold_window_secs = env::var("ROOMHOLD_HOLD_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(900);
        let expiry = match env::var("ROOMHOLD_HOLD_EXPIRY") {
            Ok(raw) => match raw.parse::<HoldExpiryName>()?.0 {
                HoldExpiryKind::Session => HoldExpiryPolicy::InheritSession,
                HoldExpiryKind::Independent => HoldExpiryPolicy::Independent {
                    window_secs: hold_window_secs,
                },
            },
            Err(_) => defaults.holds.expiry,
        };

        let config = Self {
            backend: BackendConfig {
                url: env::var("ROOMHOLD_BACKEND_URL").unwrap_or(defaults.backend.url),
                token: env::var("ROOMHOLD_BACKEND_TOKEN").ok(),
                call_timeout_ms: env::var("ROOMHOLD_CALL_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.backend.call_timeout_ms),
            },
            countdown: CountdownConfig {
                fallback_window_secs: env::var("ROOMHOLD_FALLBACK_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.countdown.fallback_window_secs),
                tick_interval_ms: env::var("ROOMHOLD_TICK_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.countdown.tick_interval_ms),
            },
            holds: HoldConfig {
                expiry,
                release_retries: env::var("ROOMHOLD_RELEASE_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.holds.release_retries),
                release_retry_delay_ms: env::var("ROOMHOLD_RELEASE_RETRY_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.holds.release_retry_delay_ms),
            },
            command_timeout_ms: env::var("ROOMHOLD_COMMAND_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.command_timeout_ms),
            broadcast_capacity: env::var("ROOMHOLD_BROADCAST_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.broadcast_capacity),
            metrics_addr: env::var("ROOMHOLD_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the values `from_env` cannot repair on its own
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroDuration`] for a zero timeout or period.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("ROOMHOLD_CALL_TIMEOUT_MS"));
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("ROOMHOLD_COMMAND_TIMEOUT_MS"));
        }
        if self.countdown.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("ROOMHOLD_TICK_INTERVAL_MS"));
        }
        if self.countdown.fallback_window_secs == 0 {
            return Err(ConfigError::ZeroDuration("ROOMHOLD_FALLBACK_WINDOW_SECS"));
        }
        Ok(())
    }

    /// Bound on every reservation-service call
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.call_timeout_ms)
    }

    /// How long a caller waits for its cart command to settle
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Countdown fallback window
    #[must_use]
    pub const fn fallback_window(&self) -> Duration {
        Duration::from_secs(self.countdown.fallback_window_secs)
    }

    /// Countdown tick period
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.countdown.tick_interval_ms)
    }

    /// Retry policy of the background release-all
    #[must_use]
    pub const fn release_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.holds.release_retries,
            Duration::from_millis(self.holds.release_retry_delay_ms),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use roomhold_core::types::{SessionId, SessionStatus, StayDates};

    #[test]
    fn test_defaults() {
        let config = BookingConfig::default();
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.fallback_window(), Duration::from_secs(900));
        assert_eq!(config.holds.expiry, HoldExpiryPolicy::InheritSession);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expiry_names() {
        assert!(matches!("Session".parse::<HoldExpiryName>().unwrap().0, HoldExpiryKind::Session));
        assert!(matches!(
            " independent ".parse::<HoldExpiryName>().unwrap().0,
            HoldExpiryKind::Independent
        ));
        assert_eq!(
            "forever".parse::<HoldExpiryName>().err(),
            Some(ConfigError::UnknownHoldExpiry("forever".into()))
        );
    }

    #[test]
    fn test_requested_expiry_policies() {
        let now = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let session = BookingSession {
            id: SessionId::new("s1"),
            dates: StayDates::parse("2025-12-01", "2025-12-03").unwrap(),
            expires_at: now + chrono::Duration::minutes(10),
            status: SessionStatus::Active,
        };

        assert_eq!(HoldExpiryPolicy::InheritSession.requested_expiry(&session, now), session.expires_at);
        assert_eq!(
            HoldExpiryPolicy::Independent { window_secs: 900 }.requested_expiry(&session, now),
            now + chrono::Duration::minutes(15)
        );
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut config = BookingConfig::default();
        config.command_timeout_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("ROOMHOLD_COMMAND_TIMEOUT_MS"))
        );
    }
}
