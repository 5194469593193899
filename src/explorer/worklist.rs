//! This module contains the worklists that order the states waiting to be
//! explored.

use std::collections::VecDeque;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::vm::state::ExecutionState;

/// A collection of states that are waiting to be explored, which decides the
/// order they are explored in.
pub trait Worklist
where
    Self: Send,
{
    /// Adds `state` to the worklist.
    fn push(&mut self, state: ExecutionState);

    /// Takes the next state to explore off the worklist.
    fn pop(&mut self) -> Option<ExecutionState>;

    /// Gets the number of states waiting.
    #[must_use]
    fn len(&self) -> usize;

    /// Checks if no states are waiting.
    #[must_use]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every waiting state.
    fn drain(&mut self) -> Vec<ExecutionState> {
        std::iter::from_fn(|| self.pop()).collect()
    }
}

/// The exploration orders that the explorer supports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Strategy {
    /// Breadth-first, exploring states in the order they were found.
    #[default]
    Fifo,

    /// Depth-first, exploring the most recently found state next.
    Lifo,

    /// A uniformly random waiting state, drawn from a generator seeded with
    /// `seed` so that runs can be repeated.
    Random { seed: u64 },
}

impl Strategy {
    /// Constructs an empty worklist implementing the strategy.
    #[must_use]
    pub fn worklist(&self) -> Box<dyn Worklist> {
        match self {
            Self::Fifo => Box::<Fifo>::default(),
            Self::Lifo => Box::<Lifo>::default(),
            Self::Random { seed } => Box::new(Random::new(*seed)),
        }
    }
}

/// A first-in first-out worklist.
#[derive(Debug, Default)]
pub struct Fifo {
    states: VecDeque<ExecutionState>,
}

impl Worklist for Fifo {
    fn push(&mut self, state: ExecutionState) {
        self.states.push_back(state);
    }

    fn pop(&mut self) -> Option<ExecutionState> {
        self.states.pop_front()
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

/// A last-in first-out worklist.
#[derive(Debug, Default)]
pub struct Lifo {
    states: Vec<ExecutionState>,
}

impl Worklist for Lifo {
    fn push(&mut self, state: ExecutionState) {
        self.states.push(state);
    }

    fn pop(&mut self) -> Option<ExecutionState> {
        self.states.pop()
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

/// A worklist that hands out its states in a seeded random order.
#[derive(Debug)]
pub struct Random {
    states: Vec<ExecutionState>,
    rng:    StdRng,
}

impl Random {
    /// Constructs an empty worklist drawing from a generator seeded with
    /// `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            states: Vec::new(),
            rng:    StdRng::seed_from_u64(seed),
        }
    }
}

impl Worklist for Random {
    fn push(&mut self, state: ExecutionState) {
        self.states.push(state);
    }

    fn pop(&mut self) -> Option<ExecutionState> {
        if self.states.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.states.len());
        Some(self.states.swap_remove(index))
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use crate::{
        explorer::worklist::Strategy,
        vm::state::ExecutionState,
        world::WorldState,
    };

    fn states(count: usize) -> (Vec<ExecutionState>, Vec<Uuid>) {
        let states: Vec<_> = (0..count).map(|_| ExecutionState::genesis(WorldState::new())).collect();
        let ids = states.iter().map(ExecutionState::id).collect();
        (states, ids)
    }

    fn order(strategy: Strategy, states: Vec<ExecutionState>) -> Vec<Uuid> {
        let mut worklist = strategy.worklist();
        states.into_iter().for_each(|s| worklist.push(s));
        assert_eq!(worklist.len(), 3);
        worklist.drain().iter().map(ExecutionState::id).collect()
    }

    #[test]
    fn fifo_is_breadth_first() {
        let (states, ids) = states(3);
        assert_eq!(order(Strategy::Fifo, states), ids);
    }

    #[test]
    fn lifo_is_depth_first() {
        let (states, mut ids) = states(3);
        ids.reverse();
        assert_eq!(order(Strategy::Lifo, states), ids);
    }

    #[test]
    fn random_is_repeatable_for_a_seed() {
        let (states, ids) = states(3);
        let first = order(Strategy::Random { seed: 7 }, states.clone());
        let second = order(Strategy::Random { seed: 7 }, states);

        assert_eq!(first, second);
        let mut sorted = first;
        sorted.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(sorted, expected);
    }
}
