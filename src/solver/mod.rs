//! This module contains the constraint solver interface used to decide the
//! feasibility of path conditions and to produce concrete models for them.
//!
//! # Decision Procedures
//!
//! Queries are first answered from a cache keyed on the canonical text of the
//! constraint set. On a miss they go to the in-process [`BuiltinBackend`],
//! which can refute simple conditions and find verified models for many
//! others. Anything the built-in backend cannot decide is handed to the
//! external backend, if one is configured, subject to a global query budget
//! and a limit on the number of concurrently running queries.
//!
//! An answer of [`SatResult::Unknown`] is never an error. The explorer treats
//! it as feasible and flags the state accordingly.

pub mod builtin;
pub mod process;

use std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use ethnum::U256;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::{
    constant::{
        DEFAULT_SOLVER_CANDIDATE_LIMIT,
        DEFAULT_SOLVER_COMMAND,
        DEFAULT_SOLVER_CONCURRENCY_LIMIT,
        DEFAULT_SOLVER_QUERY_BUDGET,
        DEFAULT_SOLVER_RETRIES,
        DEFAULT_SOLVER_TIMEOUT,
    },
    error::solver::{Error, Result},
    expr::{
        eval::{self, Assignment},
        smtlib,
        word::Word,
        Symbol,
        SymbolicValue,
    },
    vm::path::PathCondition,
};
pub use builtin::BuiltinBackend;
pub use process::ProcessBackend;

/// The reasons that a satisfiability query can go undecided.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum UnknownReason {
    /// The external solver did not answer within its time limit, including
    /// all retries.
    Timeout,

    /// No available decision procedure was able to decide the query.
    Incomplete,

    /// The global budget of external queries has been used up.
    BudgetExhausted,

    /// The external solver could not be run or produced unusable output.
    Unavailable(String),
}

impl Display for UnknownReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "solver timeout"),
            Self::Incomplete => write!(f, "incomplete decision procedure"),
            Self::BudgetExhausted => write!(f, "solver budget exhausted"),
            Self::Unavailable(reason) => write!(f, "solver unavailable ({reason})"),
        }
    }
}

/// The answer to a satisfiability query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(UnknownReason),
}

impl SatResult {
    /// Checks if a path with this answer should be explored further.
    ///
    /// Undecided answers are treated as feasible, except when the solver's
    /// budget has run out.
    #[must_use]
    pub fn is_explorable(&self) -> bool {
        match self {
            Self::Sat => true,
            Self::Unsat => false,
            Self::Unknown(reason) => reason != &UnknownReason::BudgetExhausted,
        }
    }
}

/// The answer a [`Backend`] gives to a query, including a model when the
/// constraints are satisfiable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Answer {
    Sat(Model),
    Unsat,
    Unknown(UnknownReason),
}

impl Answer {
    /// Gets the satisfiability result corresponding to the answer.
    #[must_use]
    pub fn result(&self) -> SatResult {
        match self {
            Self::Sat(_) => SatResult::Sat,
            Self::Unsat => SatResult::Unsat,
            Self::Unknown(reason) => SatResult::Unknown(reason.clone()),
        }
    }
}

/// An assignment of concrete values to symbols.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Model {
    values: BTreeMap<Symbol, U256>,
}

impl Model {
    /// Constructs an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` to `symbol`, truncated to the symbol's width.
    pub fn insert(&mut self, symbol: Symbol, value: U256) {
        let value = Word::new(value, symbol.width()).value();
        self.values.insert(symbol, value);
    }

    /// Gets the value assigned to `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<U256> {
        self.values.get(symbol).copied()
    }

    /// Evaluates `value` under the model, with unassigned symbols read as
    /// zero.
    #[must_use]
    pub fn evaluate(&self, value: &SymbolicValue) -> Word {
        eval::evaluate(value, self)
    }

    /// Checks if every one of `constraints` holds under the model.
    #[must_use]
    pub fn satisfies(&self, constraints: &[SymbolicValue]) -> bool {
        constraints.iter().all(|c| eval::holds(c, self))
    }

    /// Iterates over the assignments in the model.
    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &U256)> {
        self.values.iter()
    }

    /// Gets the number of symbols assigned in the model.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Checks if the model assigns no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Assignment for Model {
    fn value_of(&self, symbol: &Symbol) -> Option<U256> {
        self.get(symbol)
    }
}

/// A decision procedure for conjunctions of single-bit constraints.
pub trait Backend
where
    Self: Debug + Send + Sync,
{
    /// A short name for the backend, used in logs.
    fn name(&self) -> &str;

    /// Decides the conjunction of `constraints`, taking no longer than
    /// `timeout` if the backend can be interrupted.
    fn check(&self, constraints: &[SymbolicValue], timeout: Duration) -> Answer;
}

/// The configuration for the [`Solver`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The time allowed for a single external query.
    pub timeout: Duration,

    /// The number of times a timed-out external query is retried, doubling
    /// the timeout each time.
    pub max_retries: usize,

    /// The total number of external queries allowed over the solver's
    /// lifetime.
    pub query_budget: usize,

    /// The number of external queries that may run at the same time.
    pub concurrency_limit: usize,

    /// The number of candidate assignments the built-in backend tries before
    /// giving up.
    pub candidate_limit: usize,

    /// The command line used to start the external solver, or [`None`] to
    /// rely on the built-in backend alone.
    pub command: Option<Vec<String>>,
}

impl Config {
    /// Sets the timeout for a single external query.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of retries for timed-out queries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the total budget of external queries.
    #[must_use]
    pub fn with_query_budget(mut self, query_budget: usize) -> Self {
        self.query_budget = query_budget;
        self
    }

    /// Sets the number of concurrently running external queries.
    #[must_use]
    pub fn with_concurrency_limit(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit.max(1);
        self
    }

    /// Sets the number of candidates the built-in backend will try.
    #[must_use]
    pub fn with_candidate_limit(mut self, candidate_limit: usize) -> Self {
        self.candidate_limit = candidate_limit;
        self
    }

    /// Sets the command line used to start the external solver.
    #[must_use]
    pub fn with_command(mut self, command: Option<Vec<String>>) -> Self {
        self.command = command;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout:           DEFAULT_SOLVER_TIMEOUT,
            max_retries:       DEFAULT_SOLVER_RETRIES,
            query_budget:      DEFAULT_SOLVER_QUERY_BUDGET,
            concurrency_limit: DEFAULT_SOLVER_CONCURRENCY_LIMIT,
            candidate_limit:   DEFAULT_SOLVER_CANDIDATE_LIMIT,
            command:           Some(DEFAULT_SOLVER_COMMAND.iter().map(ToString::to_string).collect()),
        }
    }
}

/// A snapshot of the solver's counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// The number of satisfiability queries asked.
    pub queries: usize,

    /// The number of queries answered from the cache.
    pub cache_hits: usize,

    /// The number of queries decided by the built-in backend.
    pub builtin_decisions: usize,

    /// The number of queries sent to the external backend, including retries.
    pub external_queries: usize,

    /// The number of external queries that timed out.
    pub timeouts: usize,

    /// The number of queries that went undecided.
    pub unknowns: usize,
}

#[derive(Debug, Default)]
struct Counters {
    queries:           AtomicUsize,
    cache_hits:        AtomicUsize,
    builtin_decisions: AtomicUsize,
    external_queries:  AtomicUsize,
    timeouts:          AtomicUsize,
    unknowns:          AtomicUsize,
}

/// A pool of permits bounding the number of external queries in flight.
#[derive(Debug)]
struct Permits {
    available: Mutex<usize>,
    released:  Condvar,
}

impl Permits {
    fn new(count: usize) -> Self {
        Self {
            available: Mutex::new(count.max(1)),
            released:  Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        Permit { permits: self }
    }
}

struct Permit<'a> {
    permits: &'a Permits,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.permits.available.lock() += 1;
        self.permits.released.notify_one();
    }
}

/// The solver front end shared by every worker of an exploration.
#[derive(Debug)]
pub struct Solver {
    config:             Config,
    builtin:            BuiltinBackend,
    external:           Option<Box<dyn Backend>>,
    external_available: AtomicBool,
    cache:              DashMap<String, Answer>,
    permits:            Permits,
    counters:           Counters,
}

impl Solver {
    /// Constructs a new solver from `config`, using an external process
    /// backend if the config names a command.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let external = config
            .command
            .clone()
            .filter(|c| !c.is_empty())
            .map(|c| Box::new(ProcessBackend::new(c)) as Box<dyn Backend>);
        Self::build(config, external)
    }

    /// Constructs a new solver that only uses the built-in backend.
    #[must_use]
    pub fn builtin_only(config: Config) -> Self {
        Self::build(config.with_command(None), None)
    }

    /// Constructs a new solver that uses `backend` for the queries the
    /// built-in backend cannot decide.
    #[must_use]
    pub fn with_backend(config: Config, backend: Box<dyn Backend>) -> Self {
        Self::build(config, Some(backend))
    }

    fn build(config: Config, external: Option<Box<dyn Backend>>) -> Self {
        Self {
            builtin: BuiltinBackend::new(config.candidate_limit),
            permits: Permits::new(config.concurrency_limit),
            external_available: AtomicBool::new(external.is_some()),
            external,
            cache: DashMap::new(),
            counters: Counters::default(),
            config,
        }
    }

    /// Gets the solver's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decides whether `path` can be satisfied.
    #[must_use]
    pub fn is_satisfiable(&self, path: &PathCondition) -> SatResult {
        if path.is_trivially_false() {
            self.counters.queries.fetch_add(1, Ordering::Relaxed);
            return SatResult::Unsat;
        }
        self.decide(&path.constraints()).result()
    }

    /// Produces a model of `path` that assigns a value to every symbol in
    /// `variables`.
    ///
    /// Symbols that the decision procedure left unconstrained are assigned
    /// zero.
    ///
    /// # Errors
    ///
    /// If the path condition is unsatisfiable or could not be decided.
    pub fn get_model(&self, path: &PathCondition, variables: &[SymbolicValue]) -> Result<Model> {
        if path.is_trivially_false() {
            return Err(Error::Unsatisfiable);
        }
        let constraints = path.constraints();
        match self.decide(&constraints) {
            Answer::Sat(model) => {
                let mut result = Model::new();
                for variable in variables {
                    for symbol in variable.symbols() {
                        let value = model.get(&symbol).unwrap_or(U256::ZERO);
                        result.insert(symbol, value);
                    }
                }
                Ok(result)
            }
            Answer::Unsat => Err(Error::Unsatisfiable),
            Answer::Unknown(reason) => Err(Error::Undecided(reason)),
        }
    }

    /// Gets a snapshot of the solver's statistics.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let c = &self.counters;
        Statistics {
            queries:           c.queries.load(Ordering::Relaxed),
            cache_hits:        c.cache_hits.load(Ordering::Relaxed),
            builtin_decisions: c.builtin_decisions.load(Ordering::Relaxed),
            external_queries:  c.external_queries.load(Ordering::Relaxed),
            timeouts:          c.timeouts.load(Ordering::Relaxed),
            unknowns:          c.unknowns.load(Ordering::Relaxed),
        }
    }

    /// Decides the conjunction of `constraints`, consulting the cache and
    /// then each backend in turn.
    fn decide(&self, constraints: &[SymbolicValue]) -> Answer {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let key = smtlib::canonical_key(constraints);
        if let Some(answer) = self.cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return answer.clone();
        }

        let answer = match self.builtin.check(constraints, self.config.timeout) {
            Answer::Unknown(_) => self.decide_externally(constraints),
            decided => {
                self.counters.builtin_decisions.fetch_add(1, Ordering::Relaxed);
                decided
            }
        };
        tracing::debug!(
            constraints = constraints.len(),
            result = ?answer.result(),
            "Solver query decided"
        );

        let cacheable = !matches!(
            answer,
            Answer::Unknown(UnknownReason::BudgetExhausted | UnknownReason::Timeout)
        );
        if cacheable {
            self.cache.insert(key, answer.clone());
        }
        if matches!(answer, Answer::Unknown(_)) {
            self.counters.unknowns.fetch_add(1, Ordering::Relaxed);
        }
        answer
    }

    fn decide_externally(&self, constraints: &[SymbolicValue]) -> Answer {
        let Some(external) = &self.external else {
            return Answer::Unknown(UnknownReason::Incomplete);
        };
        if !self.external_available.load(Ordering::Relaxed) {
            return Answer::Unknown(UnknownReason::Incomplete);
        }

        let _permit = self.permits.acquire();
        let mut timeout = self.config.timeout;
        let mut attempt = 0;
        loop {
            let spent = self.counters.external_queries.fetch_add(1, Ordering::Relaxed);
            if spent >= self.config.query_budget {
                tracing::warn!(budget = self.config.query_budget, "Solver query budget exhausted");
                return Answer::Unknown(UnknownReason::BudgetExhausted);
            }

            let answer = external.check(constraints, timeout);
            match &answer {
                Answer::Unknown(UnknownReason::Timeout) => {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    if attempt < self.config.max_retries {
                        attempt += 1;
                        timeout = timeout.saturating_mul(2);
                        tracing::warn!(
                            backend = external.name(),
                            ?timeout,
                            attempt,
                            "Solver query timed out, retrying"
                        );
                        continue;
                    }
                    tracing::warn!(backend = external.name(), "Solver query timed out");
                }
                Answer::Unknown(UnknownReason::Unavailable(reason)) => {
                    tracing::warn!(
                        backend = external.name(),
                        reason,
                        "External solver unavailable, continuing with the built-in backend"
                    );
                    self.external_available.store(false, Ordering::Relaxed);
                    return Answer::Unknown(UnknownReason::Incomplete);
                }
                Answer::Sat(model) if !model.satisfies(constraints) => {
                    tracing::debug!(
                        backend = external.name(),
                        "External model does not reproduce under concrete evaluation"
                    );
                }
                _ => (),
            }
            return answer;
        }
    }
}

impl Default for Solver {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use crate::{
        expr::{Operator, SymbolicValue},
        solver::{Answer, Backend, Config, SatResult, Solver, UnknownReason},
        vm::path::PathCondition,
    };

    /// A backend that never decides anything but counts how often it is
    /// asked.
    #[derive(Debug, Default)]
    struct Undecided {
        calls: AtomicUsize,
    }

    impl Backend for &'static Undecided {
        fn name(&self) -> &str {
            "undecided"
        }

        fn check(&self, _: &[SymbolicValue], _: Duration) -> Answer {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Answer::Unknown(UnknownReason::Timeout)
        }
    }

    /// A condition the built-in backend cannot decide: `x * x == 2`.
    fn hard_condition() -> anyhow::Result<PathCondition> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let square = SymbolicValue::apply(Operator::Mul, vec![x.clone(), x])?;
        let eq = SymbolicValue::apply(Operator::Eq, vec![square, SymbolicValue::word(2u8)])?;
        Ok(PathCondition::new().with(eq)?)
    }

    #[test]
    fn refutes_contradictory_bounds() -> anyhow::Result<()> {
        let solver = Solver::builtin_only(Config::default());
        let x = SymbolicValue::fresh_symbol(256, "x");
        let low = SymbolicValue::apply(Operator::Ult, vec![x.clone(), SymbolicValue::word(10u8)])?;
        let high = SymbolicValue::apply(Operator::Ugt, vec![x, SymbolicValue::word(20u8)])?;
        let path = PathCondition::new().with(low)?.with(high)?;

        assert_eq!(solver.is_satisfiable(&path), SatResult::Unsat);

        Ok(())
    }

    #[test]
    fn produces_models_covering_requested_variables() -> anyhow::Result<()> {
        let solver = Solver::builtin_only(Config::default());
        let x = SymbolicValue::fresh_symbol(256, "x");
        let unused = SymbolicValue::fresh_symbol(256, "unused");
        let bound = SymbolicValue::apply(Operator::Ugt, vec![x.clone(), SymbolicValue::word(41u8)])?;
        let path = PathCondition::new().with(bound.clone())?;

        let model = solver.get_model(&path, &[x.clone(), unused])?;
        assert_eq!(model.len(), 2);
        assert!(model.satisfies(&[bound]));

        Ok(())
    }

    #[test]
    fn repeated_queries_hit_the_cache() -> anyhow::Result<()> {
        let solver = Solver::builtin_only(Config::default());
        let x = SymbolicValue::fresh_symbol(256, "x");
        let bound = SymbolicValue::apply(Operator::Ult, vec![x, SymbolicValue::word(3u8)])?;
        let path = PathCondition::new().with(bound)?;

        assert_eq!(solver.is_satisfiable(&path), SatResult::Sat);
        assert_eq!(solver.is_satisfiable(&path), SatResult::Sat);
        let stats = solver.statistics();
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.cache_hits, 1);

        Ok(())
    }

    #[test]
    fn undecided_queries_are_unknown_without_a_backend() -> anyhow::Result<()> {
        let solver = Solver::builtin_only(Config::default());
        let path = hard_condition()?;
        assert_eq!(
            solver.is_satisfiable(&path),
            SatResult::Unknown(UnknownReason::Incomplete)
        );
        assert!(solver.get_model(&path, &[]).is_err());

        Ok(())
    }

    #[test]
    fn timeouts_are_retried_then_budget_runs_out() -> anyhow::Result<()> {
        let backend: &'static Undecided = Box::leak(Box::new(Undecided::default()));
        let config = Config::default()
            .with_timeout(Duration::from_millis(1))
            .with_max_retries(2)
            .with_query_budget(4);
        let solver = Solver::with_backend(config, Box::new(backend));

        let first = solver.is_satisfiable(&hard_condition()?);
        assert_eq!(first, SatResult::Unknown(UnknownReason::Timeout));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

        let second = solver.is_satisfiable(&hard_condition()?);
        assert_eq!(second, SatResult::Unknown(UnknownReason::BudgetExhausted));
        assert!(!second.is_explorable());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);

        Ok(())
    }
}
