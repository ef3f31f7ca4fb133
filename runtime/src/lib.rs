//! # Roomhold Runtime
//!
//! Runtime pieces of the room-hold booking coordinator.
//!
//! [`Store`] owns the cart state and drives the reducer's server calls.
//! [`countdown`] ticks a session deadline to zero, [`retry`] backs off on
//! transient reservation-service failures and [`metrics`] names what gets
//! recorded.
//!
//! ## Example
//!
//! ```ignore
//! use roomhold_runtime::Store;
//!
//! let store = Store::new(CartState::default(), CartReducer, environment);
//!
//! store.send(CartAction::Clear).await?;
//! let held = store.state(|s| s.cart.total_count()).await;
//! ```

use roomhold_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Countdown clock driven by a session deadline
pub mod countdown;

/// Metric names and the Prometheus exporter
pub mod metrics;

/// Backoff for transient server failures
pub mod retry;

/// Store failures
pub mod error {
    use thiserror::Error;

    /// Why a store call did not go through
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// `shutdown` was called; new commands are refused
        #[error("cart store is draining")]
        ShutdownInProgress,

        /// Effects were still running when the drain deadline passed
        #[error("{0} server calls still in flight at the drain deadline")]
        ShutdownTimeout(usize),

        /// `send_and_wait_for` saw no matching action in time
        #[error("no answer for the command in time")]
        Timeout,

        /// The action broadcast went away while waiting
        #[error("action broadcast closed")]
        ChannelClosed,
    }

    impl From<StoreError> for roomhold_core::BookingError {
        fn from(error: StoreError) -> Self {
            match error {
                StoreError::ShutdownInProgress | StoreError::ShutdownTimeout(_) => {
                    Self::NoActiveSession
                },
                StoreError::Timeout | StoreError::ChannelClosed => {
                    Self::Network(format!("no answer from the booking coordinator: {error}"))
                },
            }
        }
    }
}

pub use countdown::{CountdownClock, CountdownRun, ExpirySignal};
pub use error::StoreError;
pub use store::Store;

/// Store tuning
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of actions buffered for slow observers
    pub broadcast_capacity: usize,
}

impl StoreConfig {
    /// Overrides `broadcast_capacity`
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

/// Decrements the global pending-effect counter on drop, even on panic
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The [`Store`](store::Store)
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, Ordering, PendingGuard, Reducer, RwLock,
        StoreConfig, StoreError,
    };
    use tokio::sync::{broadcast, watch};

    /// Runs one reducer over shared state
    ///
    /// Reducer calls are serialized by the write lock; effects run in spawned
    /// tasks and may complete in any order. Every action produced by an effect
    /// is reduced first and then broadcast, so an observer that receives an
    /// action can rely on the state already reflecting it.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        action_broadcast: broadcast::Sender<A>,
        state_watch: Arc<watch::Sender<S>>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Store with [`StoreConfig::default`]
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, &StoreConfig::default())
        }

        /// Store with explicit tuning
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: &StoreConfig,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));
            let (state_watch, _) = watch::channel(initial_state.clone());

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
                state_watch: Arc::new(state_watch),
            }
        }

        /// Reduces `action` under the write lock, publishes the snapshot and
        /// spawns the returned effects
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Command refused while draining");
                metrics::counter!("roomhold.store.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("roomhold.store.actions").increment(1);

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut state, action, &self.environment);
                metrics::histogram!("roomhold.store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                // Published under the lock so snapshots arrive in reduction order
                self.state_watch.send_replace(state.clone());

                tracing::trace!(effects = effects.len(), "Reduced");
                effects
            };

            for effect in effects {
                self.execute_effect(effect);
            }

            Ok(())
        }

        /// Sends `action` and resolves with the first fed-back action
        /// accepted by `predicate`
        ///
        /// Concurrent callers tell their answers apart by request id.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: no matching action within `timeout`
        /// - [`StoreError::ChannelClosed`]: the broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            // subscribed before sending so a fast answer is not missed
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged, {} actions skipped", skipped);
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to state snapshots, one per reduced action
        #[must_use]
        pub fn subscribe_state(&self) -> watch::Receiver<S> {
            self.state_watch.subscribe()
        }

        /// Projects the current state
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Number of effects still running
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::Acquire)
        }

        /// Refuses new commands and waits for in-flight server calls
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
        /// when `timeout` elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Draining store");
            self.shutdown.store(true, Ordering::Release);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(20);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);
                if pending == 0 {
                    tracing::info!("Store drained");
                    return Ok(());
                }
                if start.elapsed() >= timeout {
                    tracing::error!(pending_effects = pending, "Shutdown timeout: {} effects still running", pending);
                    return Err(StoreError::ShutdownTimeout(pending));
                }
                tokio::time::sleep(poll_interval).await;
            }
        }

        /// `Future` effects run in their own task; an action they produce is
        /// sent back to the store and then broadcast to observers.
        fn execute_effect(&self, effect: Effect<A>) {
            match effect {
                Effect::None => {
                    metrics::counter!("roomhold.store.effects", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("roomhold.store.effects", "type" => "future").increment(1);

                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let guard = PendingGuard(Arc::clone(&self.pending_effects));
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;

                        if let Some(action) = fut.await {
                            if let Err(error) = store.feed_back(action).await {
                                tracing::warn!(%error, "Dropped action produced by effect");
                            }
                        }
                    });
                },
            }
        }

        /// Reduce an effect's action, then broadcast it
        ///
        /// Feedback bypasses the shutdown gate so in-flight work can settle
        /// while the store drains.
        async fn feed_back(&self, action: A) -> Result<(), StoreError> {
            let observed = action.clone();
            let effects = {
                let mut state = self.state.write().await;
                let effects = self.reducer.reduce(&mut state, action, &self.environment);
                self.state_watch.send_replace(state.clone());
                effects
            };

            for effect in effects {
                self.execute_effect(effect);
            }

            // No receivers is fine: nobody is waiting on this action
            let _ = self.action_broadcast.send(observed);
            Ok(())
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
                state_watch: Arc::clone(&self.state_watch),
            }
        }
    }
}
