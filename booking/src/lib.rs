//! # Roomhold Booking
//!
//! Booking-session and inventory-hold coordination for one customer's
//! checkout.
//!
//! ## Components
//!
//! - **Session Controller** ([`session`]): opens, re-dates, expires, resets
//!   and completes the booking session
//! - **Hold Manager** ([`holds`]): the roster of holds the server granted
//! - **Cart Aggregator** ([`cart`]): a reducer that turns room-type quantity
//!   changes into hold calls
//! - **Recovery Controller** ([`recovery`]): optimistic cart changes with a
//!   symmetric rollback
//! - **Coordinator** ([`coordinator`]): the facade a booking UI talks to
//!
//! The countdown lives in `roomhold_runtime::countdown`.
//!
//! ## Example
//!
//! ```ignore
//! use roomhold_booking::{BookingConfig, BookingCoordinator, HttpReservationBackend};
//!
//! let config = BookingConfig::from_env()?;
//! let backend = Arc::new(HttpReservationBackend::from_config(&config.backend));
//! let booking = BookingCoordinator::new(backend, Arc::new(SystemClock), &config);
//!
//! booking.start_session(check_in, check_out).await?;
//! let hold = booking.increase(RoomTypeId::new("Deluxe"), 3).await?;
//! ```

pub mod cart;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod holds;
pub mod http;
pub mod recovery;
pub mod session;

pub use cart::{CartAction, CartEnvironment, CartOutcome, CartReducer, CartState};
pub use config::{BookingConfig, ConfigError, HoldExpiryPolicy};
pub use context::{BookingSessionContext, SessionSlot};
pub use coordinator::BookingCoordinator;
pub use holds::HoldManager;
pub use http::HttpReservationBackend;
pub use recovery::{CartMutation, RecoveryLedger, RequestId};
pub use session::SessionController;
