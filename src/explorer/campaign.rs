//! This module contains the [`Campaign`], the results of one exploration, and
//! the [`Testcase`]s that can be concretised from it.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
    time::Duration,
};

use ethnum::U256;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    error::{explorer, solver as solver_error, Result},
    solver::{self, Model, Solver},
    vm::{
        outcome::{ExceptionKind, OutcomeKind},
        state::{ExecutionState, TransactionKind},
    },
    world::Address,
};

/// Why a state was left unexplored.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum UnexploredReason {
    /// The state executed its maximum number of steps.
    StepBound,

    /// The exploration created its maximum number of states.
    StateBound,

    /// The exploration ran out of time.
    TimeBudget,

    /// The exploration was stopped from outside.
    Cancelled,

    /// The solver's query budget ran out before the state's feasibility was
    /// decided.
    SolverExhausted,
}

impl Display for UnexploredReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::StepBound => "step bound reached",
            Self::StateBound => "state bound reached",
            Self::TimeBudget => "time budget exhausted",
            Self::Cancelled => "cancelled",
            Self::SolverExhausted => "solver budget exhausted",
        };
        write!(f, "{text}")
    }
}

/// A state that the exploration did not finish, and why.
#[derive(Clone, Debug)]
pub struct Unexplored {
    pub state:  ExecutionState,
    pub reason: UnexploredReason,
}

/// Counters describing how an exploration went.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// The number of states the exploration started from or created.
    pub states: usize,

    /// The number of instructions executed.
    pub steps: usize,

    /// The number of forks on symbolic conditions.
    pub forks: usize,

    /// The number of fork arms discarded as infeasible.
    pub pruned: usize,

    /// The number of fork arms kept without the solver deciding them.
    pub flagged: usize,

    /// The time the exploration took.
    pub elapsed: Duration,

    /// The solver's counters at the end of the exploration.
    pub solver: solver::Statistics,
}

impl Statistics {
    /// Adds the counters of a later exploration to these.
    pub(crate) fn absorb(&mut self, other: &Self) {
        self.states += other.states;
        self.steps += other.steps;
        self.forks += other.forks;
        self.pruned += other.pruned;
        self.flagged += other.flagged;
        self.elapsed += other.elapsed;
        self.solver = other.solver;
    }
}

/// The results of exploring one or more transactions: every terminal state
/// that was reached, and every state that was left unexplored.
///
/// The campaign keeps a handle on the solver that produced it, so that its
/// terminal states can be concretised into [`Testcase`]s.
#[derive(Clone, Debug)]
pub struct Campaign {
    terminals:  Vec<ExecutionState>,
    unexplored: Vec<Unexplored>,
    statistics: Statistics,
    solver:     Arc<Solver>,
}

impl Campaign {
    /// Constructs a campaign from the results of an exploration.
    #[must_use]
    pub fn new(
        terminals: Vec<ExecutionState>,
        unexplored: Vec<Unexplored>,
        statistics: Statistics,
        solver: Arc<Solver>,
    ) -> Self {
        Self {
            terminals,
            unexplored,
            statistics,
            solver,
        }
    }

    /// Gets every terminal state, in the order they were reached.
    #[must_use]
    pub fn terminals(&self) -> &[ExecutionState] {
        &self.terminals
    }

    /// Gets the states that were left unexplored.
    #[must_use]
    pub fn unexplored(&self) -> &[Unexplored] {
        &self.unexplored
    }

    /// Gets the statistics of the exploration.
    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Gets the terminal states that returned successfully.
    pub fn successes(&self) -> impl Iterator<Item = &ExecutionState> {
        self.terminals.iter().filter(|s| s.outcome().is_some_and(|o| o.is_success()))
    }

    /// Gets the terminal states that did not return successfully: reverts,
    /// exceptions and failed assertions.
    pub fn violations(&self) -> impl Iterator<Item = &ExecutionState> {
        self.terminals.iter().filter(|s| s.outcome().is_some_and(|o| !o.is_success()))
    }

    /// Gets the terminal states that ended in a failed assertion, either an
    /// `INVALID` instruction or a Solidity assertion panic.
    pub fn assertion_failures(&self) -> impl Iterator<Item = &ExecutionState> {
        self.terminals.iter().filter(|s| s.is_violation())
    }

    /// Gets the terminal states whose outcome is of `kind`.
    #[must_use]
    pub fn by_kind(&self, kind: OutcomeKind) -> Vec<&ExecutionState> {
        self.terminals
            .iter()
            .filter(|s| s.outcome().is_some_and(|o| o.kind() == kind))
            .collect()
    }

    /// Gets the terminal states that ended with the exception `kind`.
    #[must_use]
    pub fn by_exception(&self, kind: ExceptionKind) -> Vec<&ExecutionState> {
        self.terminals
            .iter()
            .filter(|s| s.outcome().and_then(|o| o.exception()) == Some(kind))
            .collect()
    }

    /// Checks if the exploration covered every feasible path.
    ///
    /// This is the case only when no state was left unexplored and every fork
    /// was decided by the solver.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unexplored.is_empty()
            && self.statistics.flagged == 0
            && self.terminals.iter().all(|s| s.solver_flags().is_empty())
    }

    /// Produces concrete inputs that drive execution to the terminal state at
    /// `index`.
    ///
    /// # Errors
    ///
    /// If there is no such state, or the solver cannot produce a model of its
    /// path condition.
    pub fn concretize(&self, index: usize) -> Result<Testcase> {
        let state = self
            .terminals
            .get(index)
            .ok_or(explorer::Error::NoSuchState(index))?;
        Ok(Testcase::from_state(state, &self.solver)?)
    }

    /// Adds the results of a later exploration to this campaign.
    pub(crate) fn absorb(&mut self, other: Campaign) {
        self.terminals.extend(other.terminals);
        self.unexplored.extend(other.unexplored);
        self.statistics.absorb(&other.statistics);
    }

    /// Adds `states` to the terminal states.
    pub(crate) fn extend_terminals(&mut self, states: impl IntoIterator<Item = ExecutionState>) {
        self.terminals.extend(states);
    }

    /// Removes the terminal states selected by `take`, returning them.
    pub(crate) fn take_terminals(
        &mut self,
        take: impl Fn(&ExecutionState) -> bool,
    ) -> Vec<ExecutionState> {
        let (taken, kept) = std::mem::take(&mut self.terminals).into_iter().partition(take);
        self.terminals = kept;
        taken
    }
}

/// One concrete transaction of a [`Testcase`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConcreteTransaction {
    pub kind:     TransactionKind,
    pub caller:   Address,
    pub target:   Address,
    pub function: Option<String>,

    #[serde(with = "hex_bytes")]
    pub calldata: Vec<u8>,

    #[serde(with = "hex_word")]
    pub value: U256,
}

/// A concrete sequence of transactions that reproduces one execution path,
/// together with what the path ended in.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Testcase {
    /// The transactions, oldest first.
    pub transactions: Vec<ConcreteTransaction>,

    /// How the last transaction ended.
    pub outcome: OutcomeKind,

    /// The exception that ended the last transaction, if any.
    pub exception: Option<ExceptionKind>,

    /// The data the last transaction returned or reverted with.
    #[serde(with = "hex_bytes")]
    pub output: Vec<u8>,

    /// Whether the path ended in a failed assertion.
    pub assertion_failure: bool,

    /// Whether some branch on the path was taken without the solver deciding
    /// it, in which case the testcase may not reproduce the path.
    pub flagged: bool,
}

impl Testcase {
    /// Concretises the terminal `state` under a model from `solver`.
    ///
    /// # Errors
    ///
    /// If the state is not terminal or its path condition has no model.
    pub fn from_state(state: &ExecutionState, solver: &Solver) -> solver_error::Result<Self> {
        let outcome = state.outcome().ok_or(solver_error::Error::Unsatisfiable)?;
        let mut variables = state.inputs();
        variables.extend(outcome.data().iter().cloned());
        let model = solver.get_model(state.path(), &variables)?;

        let transactions = state
            .transactions()
            .iter()
            .map(|tx| ConcreteTransaction {
                kind:     tx.kind,
                caller:   tx.caller,
                target:   tx.target,
                function: tx.function.clone(),
                calldata: concrete_bytes(&model, &tx.calldata),
                value:    model.evaluate(&tx.value).value(),
            })
            .collect();

        Ok(Self {
            transactions,
            outcome: outcome.kind(),
            exception: outcome.exception(),
            output: concrete_bytes(&model, outcome.data()),
            assertion_failure: outcome.is_assertion_failure(),
            flagged: !state.solver_flags().is_empty(),
        })
    }
}

impl Display for Testcase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let transactions = self
            .transactions
            .iter()
            .map(|tx| {
                format!(
                    "{} -> {} {} 0x{} value {}",
                    tx.caller,
                    tx.target,
                    tx.function.as_deref().unwrap_or("<raw>"),
                    hex::encode(&tx.calldata),
                    tx.value
                )
            })
            .join("\n  ");
        write!(f, "[\n  {transactions}\n] => {:?}", self.outcome)
    }
}

/// Evaluates byte-wide `values` under `model`.
fn concrete_bytes(model: &Model, values: &[crate::expr::SymbolicValue]) -> Vec<u8> {
    values
        .iter()
        .map(|v| u8::try_from(model.evaluate(v).value()).unwrap_or(u8::MAX))
        .collect()
}

/// Serializes bytes as a `0x`-prefixed hex string.
mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text.trim_start_matches("0x")).map_err(de::Error::custom)
    }
}

/// Serializes a word as a `0x`-prefixed hex string.
mod hex_word {
    use ethnum::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let text = String::deserialize(deserializer)?;
        U256::from_str_radix(text.trim_start_matches("0x"), 16).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        explorer::campaign::{ConcreteTransaction, Testcase},
        vm::{outcome::OutcomeKind, state::TransactionKind},
        world::Address,
    };

    #[test]
    fn testcases_serialize_words_as_hex() -> anyhow::Result<()> {
        let testcase = Testcase {
            transactions:      vec![ConcreteTransaction {
                kind:     TransactionKind::Call,
                caller:   Address::from(1),
                target:   Address::from(2),
                function: Some("f()".into()),
                calldata: vec![0x26, 0x12, 0x1f, 0xf0],
                value:    U256::from(255u8),
            }],
            outcome:           OutcomeKind::Revert,
            exception:         None,
            output:            vec![],
            assertion_failure: false,
            flagged:           false,
        };
        let json = serde_json::to_value(&testcase)?;

        assert_eq!(json["transactions"][0]["calldata"], "0x26121ff0");
        assert_eq!(json["transactions"][0]["value"], "0xff");
        assert_eq!(serde_json::from_value::<Testcase>(json)?, testcase);

        Ok(())
    }
}
