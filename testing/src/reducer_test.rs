//! Given-When-Then tests for reducers.
//!
//! Besides the resulting state and raw effects, a test can assert on the
//! actions the effects feed back (`then_feedback`). Effects are driven to
//! completion on a throwaway Tokio runtime, so effects that talk to an
//! in-memory backend or use Tokio timers work as they would in a store.

#![allow(clippy::module_name_repetitions)]

use roomhold_core::{effect::Effect, reducer::Reducer};

/// Check run against the final state
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Check run against the effects of the last action
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Check run against the actions those effects produce
type FeedbackAssertion<A> = Box<dyn FnOnce(&[A])>;

/// Builder for one reducer scenario: given a state, when actions arrive, then check
///
/// # Example
///
/// ```ignore
/// use roomhold_testing::ReducerTest;
///
/// ReducerTest::new(CartReducer)
///     .with_env(environment)
///     .given_state(CartState::default())
///     .when_action(CartAction::Decrease { request, room_type: "Suite".into() })
///     .then_state(|state| assert!(state.cart.is_empty()))
///     .then_feedback(|actions| assert_eq!(actions.len(), 1))
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    actions: Vec<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
    feedback_assertions: Vec<FeedbackAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Starts a scenario for `reducer`
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
            feedback_assertions: Vec::new(),
        }
    }

    /// Environment handed to every `reduce` call
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// State before the first action
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Queues an action
    ///
    /// Several actions are reduced in order. Effect and feedback assertions
    /// apply to the effects of the last one.
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    /// Checks the state after every action was reduced
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Checks the effects returned for the last action
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Checks the actions the last effects feed back once driven
    #[must_use]
    pub fn then_feedback<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[A]) + 'static,
    {
        self.feedback_assertions.push(Box::new(assertion));
        self
    }

    /// Reduces the queued actions and runs every check
    ///
    /// # Panics
    ///
    /// When the scenario is incomplete (no state, environment or action) or a
    /// check fails.
    #[allow(clippy::panic, clippy::expect_used)]
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("given_state() was not called");

        assert!(!self.actions.is_empty(), "when_action() was not called");

        let env = self
            .environment
            .expect("with_env() was not called");

        let mut effects = Vec::new();
        for action in self.actions {
            effects = self.reducer.reduce(&mut state, action, &env).into_vec();
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }

        for assertion in self.effect_assertions {
            assertion(&effects);
        }

        if !self.feedback_assertions.is_empty() {
            let fed_back = assertions::drive_effects(effects);
            for assertion in self.feedback_assertions {
                assertion(&fed_back);
            }
        }
    }
}

/// Reusable effect checks
pub mod assertions {
    use roomhold_core::effect::Effect;

    /// Only `Effect::None`, if anything
    ///
    /// # Panics
    ///
    /// On any `Future` effect.
    #[allow(clippy::panic)]
    pub fn assert_no_effects<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(|e| matches!(e, Effect::None)),
            "expected no work, got {effects:?}"
        );
    }

    /// Exactly `expected` effects
    ///
    /// # Panics
    ///
    /// On any other count.
    #[allow(clippy::panic)]
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(effects.len(), expected, "wrong number of effects: {effects:?}");
    }

    /// At least one effect does asynchronous work
    ///
    /// # Panics
    ///
    /// When every effect is `Effect::None`.
    #[allow(clippy::panic)]
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "expected a Future effect in {effects:?}"
        );
    }

    /// Run effects to completion and collect the actions they feed back
    ///
    /// Uses a fresh current-thread runtime, so it must not be called from
    /// inside an async test.
    pub fn drive_effects<A>(effects: Vec<Effect<A>>) -> Vec<A> {
        tokio_test::block_on(async move {
            let mut actions = Vec::new();
            for effect in effects {
                if let Effect::Future(fut) = effect {
                    if let Some(action) = fut.await {
                        actions.push(action);
                    }
                }
            }
            actions
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomhold_core::{SmallVec, smallvec};

    #[derive(Clone, Debug)]
    struct TestState {
        held: u32,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Hold,
        Held,
        Drop,
    }

    struct TestReducer;

    struct TestEnv;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Hold => smallvec![Effect::future(async {
                    tokio::task::yield_now().await;
                    TestAction::Held
                })],
                TestAction::Held => {
                    state.held += 1;
                    SmallVec::new()
                },
                TestAction::Drop => {
                    state.held = state.held.saturating_sub(1);
                    smallvec![Effect::None]
                },
            }
        }
    }

    #[test]
    fn test_feedback_is_driven() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { held: 0 })
            .when_action(TestAction::Hold)
            .then_state(|state| assert_eq!(state.held, 0))
            .then_effects(assertions::assert_has_future_effect)
            .then_feedback(|actions| assert_eq!(actions, [TestAction::Held]))
            .run();
    }

    #[test]
    fn test_actions_are_reduced_in_order() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { held: 0 })
            .when_action(TestAction::Held)
            .when_action(TestAction::Held)
            .when_action(TestAction::Drop)
            .then_state(|state| assert_eq!(state.held, 1))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_assertions_effects_count() {
        assertions::assert_effects_count(&[Effect::<TestAction>::None], 1);
        assertions::assert_effects_count::<TestAction>(&[], 0);
    }
}
