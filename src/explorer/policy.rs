//! This module contains the [`TerminationPolicy`], which bounds how much work
//! an exploration may do.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    constant::{DEFAULT_EXPLORER_WORKERS, DEFAULT_MAX_STEPS_PER_STATE},
    error::explorer::{Error, Result},
    explorer::worklist::Strategy,
};

/// The bounds on an exploration, together with how it is carried out.
///
/// Exploring a contract with loops over symbolic input need not terminate, so
/// every policy has at least one of a step, state or time bound. The default
/// policy bounds the steps per state by [`DEFAULT_MAX_STEPS_PER_STATE`] and
/// runs on [`DEFAULT_EXPLORER_WORKERS`] worker.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationPolicy {
    /// The number of instructions a state may execute in one transaction.
    pub max_steps_per_state: Option<usize>,

    /// The number of states an exploration may create, counting the states it
    /// started from.
    pub max_states: Option<usize>,

    /// The time an exploration may take.
    pub wall_clock: Option<Duration>,

    /// The number of threads that step states.
    pub workers: usize,

    /// The order that waiting states are explored in.
    pub strategy: Strategy,
}

impl TerminationPolicy {
    /// Constructs a policy from its bounds, using one worker and breadth-first
    /// exploration.
    ///
    /// # Errors
    ///
    /// If none of the bounds is set.
    pub fn new(
        max_steps_per_state: Option<usize>,
        max_states: Option<usize>,
        wall_clock: Option<Duration>,
    ) -> Result<Self> {
        let policy = Self {
            max_steps_per_state,
            max_states,
            wall_clock,
            workers: DEFAULT_EXPLORER_WORKERS,
            strategy: Strategy::default(),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Sets the `max_steps_per_state` bound to `value`.
    #[must_use]
    pub fn with_max_steps_per_state(mut self, value: usize) -> Self {
        self.max_steps_per_state = Some(value);
        self
    }

    /// Sets the `max_states` bound to `value`.
    #[must_use]
    pub fn with_max_states(mut self, value: usize) -> Self {
        self.max_states = Some(value);
        self
    }

    /// Sets the `wall_clock` bound to `value`.
    #[must_use]
    pub fn with_wall_clock(mut self, value: Duration) -> Self {
        self.wall_clock = Some(value);
        self
    }

    /// Sets the number of `workers` to `value`, which is at least one.
    #[must_use]
    pub fn with_workers(mut self, value: usize) -> Self {
        self.workers = value.max(1);
        self
    }

    /// Sets the exploration `strategy` to `value`.
    #[must_use]
    pub fn with_strategy(mut self, value: Strategy) -> Self {
        self.strategy = value;
        self
    }

    /// Checks that the policy can terminate, which matters for policies that
    /// were deserialized or edited field by field.
    ///
    /// # Errors
    ///
    /// If the policy has no bound or no workers.
    pub fn validate(&self) -> Result<()> {
        if self.max_steps_per_state.is_none() && self.max_states.is_none() && self.wall_clock.is_none()
        {
            return Err(Error::Unbounded);
        }
        if self.workers == 0 {
            return Err(Error::NoWorkers);
        }
        Ok(())
    }
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            max_steps_per_state: Some(DEFAULT_MAX_STEPS_PER_STATE),
            max_states:          None,
            wall_clock:          None,
            workers:             DEFAULT_EXPLORER_WORKERS,
            strategy:            Strategy::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{
        error::explorer::Error,
        explorer::{policy::TerminationPolicy, worklist::Strategy},
    };

    #[test]
    fn requires_a_bound() {
        assert_eq!(TerminationPolicy::new(None, None, None), Err(Error::Unbounded));
        assert!(TerminationPolicy::new(None, None, Some(Duration::from_secs(1))).is_ok());
        assert!(TerminationPolicy::default().validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() -> anyhow::Result<()> {
        let policy: TerminationPolicy =
            serde_json::from_str(r#"{"max_states": 10, "strategy": {"Random": {"seed": 3}}}"#)?;

        assert_eq!(policy.max_states, Some(10));
        assert_eq!(policy.strategy, Strategy::Random { seed: 3 });
        assert!(policy.max_steps_per_state.is_some());
        assert_eq!(policy.workers, 1);

        let unbounded: TerminationPolicy =
            serde_json::from_str(r#"{"max_steps_per_state": null}"#)?;
        assert_eq!(unbounded.validate(), Err(Error::Unbounded));

        Ok(())
    }
}
