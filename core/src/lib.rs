//! # Roomhold Core
//!
//! Core traits and domain types for the room-hold booking coordinator.
//!
//! A customer building a hotel booking tentatively holds room inventory for a
//! limited time while completing checkout. This crate holds everything that
//! is pure: the domain model, the error taxonomy, the contract of the remote
//! reservation service, and the reducer abstractions the runtime executes.
//!
//! A feature is a [`reducer::Reducer`] over its own state and action types.
//! Commands and the results of server calls arrive as actions; the reducer
//! mutates the state and hands back [`effect::Effect`] values that the
//! runtime drives. Clocks and the reservation backend reach the reducer
//! through its environment.
//!
//! ## Example
//!
//! ```ignore
//! use roomhold_core::*;
//!
//! impl Reducer for CartReducer {
//!     type State = CartState;
//!     type Action = CartAction;
//!     type Environment = CartEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CartState,
//!         action: CartAction,
//!         env: &CartEnvironment,
//!     ) -> SmallVec<[Effect<CartAction>; 4]> {
//!         // reserve a slot, call the server, settle
//!         SmallVec::new()
//!     }
//! }
//! ```

pub use chrono::{DateTime, NaiveDate, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Contract of the remote reservation service
pub mod backend;

/// Error taxonomy shared by every component
pub mod error;

/// Domain model: sessions, holds, cart, countdown state
pub mod types;

pub use error::BookingError;

/// The [`Reducer`](reducer::Reducer) trait
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// Synchronous state transition for one feature
    ///
    /// `reduce` must not block or perform I/O; server calls go in the
    /// returned effects.
    pub trait Reducer {
        /// Owned by the store
        type State;

        /// Commands plus the results effects feed back
        type Action;

        /// Shared dependencies, read-only during `reduce`
        type Environment;

        /// Applies `action` to `state` and returns the work it starts
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Work returned by reducers
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Deferred work a reducer asks the store to run
    ///
    /// Nothing runs until the store spawns it after the reducer returns.
    pub enum Effect<Action> {
        /// Nothing to run
        None,

        /// A task whose `Some` output is reduced as the next action
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action: Send + 'static> Effect<Action> {
        /// Wrap an async computation that feeds one action back into the store
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Action> + Send + 'static,
        {
            Effect::Future(Box::pin(async move { Some(fut.await) }))
        }

        /// Feed an already-known action back without doing any I/O
        ///
        /// Used to answer a request synchronously (fail-fast rejections) while
        /// still going through the action broadcast observers listen on.
        #[must_use]
        pub fn send(action: Action) -> Self {
            Effect::Future(Box::pin(std::future::ready(Some(action))))
        }
    }
}

/// Time source injected into every component
pub mod environment {
    use chrono::{DateTime, NaiveDate, Utc};

    /// Wall-clock time as the booking components see it
    ///
    /// Countdown deadlines and the past-date check both read from here, so a
    /// test clock moves them together.
    pub trait Clock: Send + Sync {
        /// Current instant
        fn now(&self) -> DateTime<Utc>;

        /// Calendar date of `now()` in UTC, used for "non-past" date checks
        fn today(&self) -> NaiveDate {
            self.now().date_naive()
        }
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
