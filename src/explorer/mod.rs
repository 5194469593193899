//! This module contains the [`Explorer`], which drives execution states
//! through the interpreter until every feasible path has reached an outcome or
//! a bound of the exploration has been hit.
//!
//! # Workers
//!
//! States share no mutable data with one another, so an exploration runs on a
//! number of worker threads that each take a state off a shared worklist, step
//! it to its next fork or outcome, and hand the results back. Each arm of a
//! fork is checked with the solver before it is admitted to the worklist.
//!
//! # Bounds
//!
//! The bounds of the [`TerminationPolicy`] and the explorer's watchdog are
//! checked when a state is taken off the worklist. Whatever is left on the
//! worklist when one of them fires is reported as [`Unexplored`] in the
//! resulting [`Campaign`], along with the reason for it.

pub mod campaign;
pub mod policy;
pub mod worklist;

use std::{sync::Arc, time::Instant};

use parking_lot::{Condvar, Mutex};

use crate::{
    constant::DEADLINE_POLL_STEPS,
    error::{
        container::Locatable,
        execution::{Error, FaultReport},
        Result,
    },
    solver::{SatResult, Solver, UnknownReason},
    vm::{state::ExecutionState, Interpreter, Transition},
    watchdog::DynWatchdog,
};
pub use campaign::{Campaign, Statistics, Testcase, Unexplored, UnexploredReason};
pub use policy::TerminationPolicy;
pub use worklist::{Strategy, Worklist};

/// The explorer, which schedules execution states over the interpreter and
/// prunes infeasible paths with the solver.
#[derive(Clone, Debug)]
pub struct Explorer {
    interpreter: Interpreter,
    solver:      Arc<Solver>,
    watchdog:    DynWatchdog,
}

impl Explorer {
    /// Constructs a new explorer that steps states with `interpreter`, checks
    /// forks with `solver` and stops early when `watchdog` says so.
    #[must_use]
    pub fn new(interpreter: Interpreter, solver: Arc<Solver>, watchdog: DynWatchdog) -> Self {
        Self {
            interpreter,
            solver,
            watchdog,
        }
    }

    /// Gets the interpreter used to step states.
    #[must_use]
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Gets the solver used to check forks.
    #[must_use]
    pub fn solver(&self) -> &Arc<Solver> {
        &self.solver
    }

    /// Explores every path reachable from the `initial` states within the
    /// bounds of `policy`.
    ///
    /// Initial states that are already terminal are reported as terminals
    /// without being stepped.
    ///
    /// # Errors
    ///
    /// If the policy cannot terminate, or the engine faults while stepping a
    /// state. A fault ends the whole exploration.
    pub fn explore(
        &self,
        initial: Vec<ExecutionState>,
        policy: &TerminationPolicy,
    ) -> Result<Campaign> {
        policy.validate()?;
        let start = Instant::now();
        let deadline = policy.wall_clock.map(|budget| start + budget);

        let mut shared = Shared::new(policy, initial.len());
        for state in initial {
            if state.is_terminal() {
                shared.terminals.push(state);
            } else {
                shared.worklist.push(state);
            }
        }

        let work = Work {
            explorer: self,
            policy,
            deadline,
            shared: Mutex::new(shared),
            wake: Condvar::new(),
        };

        tracing::info!(
            states = work.shared.lock().worklist.len(),
            workers = policy.workers,
            "Starting exploration"
        );

        let panicked = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..policy.workers).map(|_| scope.spawn(|| work.run())).collect();
            handles.into_iter().map(|h| h.join()).filter(std::result::Result::is_err).count()
        });

        let mut shared = work.shared.into_inner();
        if let Some(fault) = shared.fault.take() {
            tracing::error!(error = %fault.error, "Exploration stopped by an engine fault");
            return Err(fault.into());
        }
        if panicked > 0 {
            let fault = FaultReport::new(Error::WorkerPanicked.locate(0), &"<worker>");
            return Err(fault.into());
        }

        let reason = shared.stop.unwrap_or(UnexploredReason::Cancelled);
        let remaining = shared.worklist.drain();
        shared
            .unexplored
            .extend(remaining.into_iter().map(|state| Unexplored { state, reason }));

        let statistics = Statistics {
            states: shared.states,
            steps: shared.steps,
            forks: shared.forks,
            pruned: shared.pruned,
            flagged: shared.flagged,
            elapsed: start.elapsed(),
            solver: self.solver.statistics(),
        };
        tracing::info!(
            terminals = shared.terminals.len(),
            unexplored = shared.unexplored.len(),
            forks = statistics.forks,
            pruned = statistics.pruned,
            elapsed = ?statistics.elapsed,
            "Exploration finished"
        );

        Ok(Campaign::new(
            shared.terminals,
            shared.unexplored,
            statistics,
            self.solver.clone(),
        ))
    }

    /// Steps `state` until it forks, halts or hits a bound.
    fn advance(
        &self,
        mut state: ExecutionState,
        policy: &TerminationPolicy,
        deadline: Option<Instant>,
    ) -> std::result::Result<(Advanced, usize), Box<FaultReport>> {
        let mut steps = 0;
        loop {
            if policy.max_steps_per_state.is_some_and(|max| state.steps() >= max) {
                return Ok((Advanced::Unexplored(state, UnexploredReason::StepBound), steps));
            }
            if steps % DEADLINE_POLL_STEPS == DEADLINE_POLL_STEPS - 1
                && deadline.is_some_and(|d| Instant::now() >= d)
            {
                return Ok((Advanced::Unexplored(state, UnexploredReason::TimeBudget), steps));
            }

            steps += 1;
            match self.interpreter.step(state)? {
                Transition::Continue(next) => state = next,
                Transition::Halted(done) => return Ok((Advanced::Halted(done), steps)),
                Transition::Fork(arms) => return Ok((Advanced::Forked(*arms), steps)),
            }
        }
    }

    /// Asks the solver whether the fork `arm` can be taken.
    fn check(&self, mut arm: ExecutionState) -> Verdict {
        match self.solver.is_satisfiable(arm.path()) {
            SatResult::Sat => Verdict::Admit(arm, false),
            SatResult::Unsat => {
                tracing::debug!(id = %arm.id(), pc = arm.pc(), "Pruned infeasible path");
                Verdict::Prune
            }
            SatResult::Unknown(UnknownReason::BudgetExhausted) => Verdict::Exhausted(arm),
            SatResult::Unknown(reason) => {
                tracing::warn!(
                    id = %arm.id(),
                    pc = arm.pc(),
                    ?reason,
                    "Admitting a path the solver could not decide"
                );
                arm.flag(reason);
                Verdict::Admit(arm, true)
            }
        }
    }
}

/// The result of stepping one state.
enum Advanced {
    Halted(ExecutionState),
    Forked([ExecutionState; 2]),
    Unexplored(ExecutionState, UnexploredReason),
}

/// The solver's verdict on one arm of a fork. Admitted arms carry whether
/// they were flagged.
enum Verdict {
    Admit(ExecutionState, bool),
    Prune,
    Exhausted(ExecutionState),
}

/// The data shared between the workers of one exploration.
struct Shared {
    worklist:   Box<dyn Worklist>,
    terminals:  Vec<ExecutionState>,
    unexplored: Vec<Unexplored>,
    in_flight:  usize,
    dequeues:   usize,
    stop:       Option<UnexploredReason>,
    fault:      Option<Box<FaultReport>>,
    states:     usize,
    steps:      usize,
    forks:      usize,
    pruned:     usize,
    flagged:    usize,
}

impl Shared {
    fn new(policy: &TerminationPolicy, states: usize) -> Self {
        Self {
            worklist: policy.strategy.worklist(),
            terminals: Vec::new(),
            unexplored: Vec::new(),
            in_flight: 0,
            dequeues: 0,
            stop: None,
            fault: None,
            states,
            steps: 0,
            forks: 0,
            pruned: 0,
            flagged: 0,
        }
    }
}

/// One exploration in progress.
struct Work<'a> {
    explorer: &'a Explorer,
    policy:   &'a TerminationPolicy,
    deadline: Option<Instant>,
    shared:   Mutex<Shared>,
    wake:     Condvar,
}

impl Work<'_> {
    /// The loop run by each worker thread.
    fn run(&self) {
        while let Some(state) = self.next() {
            let _flight = InFlight { work: self };

            let (advanced, steps) = match self.explorer.advance(state, self.policy, self.deadline) {
                Ok(result) => result,
                Err(fault) => {
                    self.shared.lock().fault.get_or_insert(fault);
                    return;
                }
            };

            match advanced {
                Advanced::Halted(done) => {
                    let mut shared = self.shared.lock();
                    shared.steps += steps;
                    shared.terminals.push(done);
                }
                Advanced::Unexplored(state, reason) => {
                    let mut shared = self.shared.lock();
                    shared.steps += steps;
                    shared.unexplored.push(Unexplored { state, reason });
                }
                Advanced::Forked(arms) => {
                    tracing::debug!(pc = arms[1].pc(), "Forked on a symbolic condition");
                    let verdicts: Vec<Verdict> =
                        arms.into_iter().map(|arm| self.explorer.check(arm)).collect();
                    let mut shared = self.shared.lock();
                    shared.steps += steps;
                    shared.forks += 1;
                    for verdict in verdicts {
                        self.admit(&mut shared, verdict);
                    }
                }
            }
        }
    }

    /// Takes the next state off the worklist, waiting while other workers may
    /// still add to it.
    ///
    /// Returns [`None`] when the exploration is over for this worker.
    fn next(&self) -> Option<ExecutionState> {
        let mut shared = self.shared.lock();
        loop {
            if shared.fault.is_some() || shared.stop.is_some() {
                return None;
            }
            if !shared.worklist.is_empty() {
                if let Some(reason) = self.should_stop(&mut shared) {
                    tracing::info!(%reason, "Stopping exploration");
                    shared.stop = Some(reason);
                    self.wake.notify_all();
                    return None;
                }
                if let Some(state) = shared.worklist.pop() {
                    shared.in_flight += 1;
                    return Some(state);
                }
            }
            if shared.in_flight == 0 {
                self.wake.notify_all();
                return None;
            }
            self.wake.wait(&mut shared);
        }
    }

    /// Checks the time budget and the watchdog before a dequeue.
    fn should_stop(&self, shared: &mut Shared) -> Option<UnexploredReason> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(UnexploredReason::TimeBudget);
        }
        shared.dequeues += 1;
        let poll_every = self.explorer.watchdog.poll_every().max(1);
        if shared.dequeues % poll_every == 0 && self.explorer.watchdog.should_stop() {
            return Some(UnexploredReason::Cancelled);
        }
        None
    }

    /// Records the solver's `verdict` on a fork arm.
    fn admit(&self, shared: &mut Shared, verdict: Verdict) {
        let state = match verdict {
            Verdict::Prune => {
                shared.pruned += 1;
                return;
            }
            Verdict::Exhausted(state) => {
                shared.unexplored.push(Unexplored {
                    state,
                    reason: UnexploredReason::SolverExhausted,
                });
                return;
            }
            Verdict::Admit(state, flagged) => {
                if flagged {
                    shared.flagged += 1;
                }
                state
            }
        };

        if self.policy.max_states.is_some_and(|max| shared.states >= max) {
            shared.unexplored.push(Unexplored {
                state,
                reason: UnexploredReason::StateBound,
            });
            return;
        }
        shared.states += 1;

        if state.is_terminal() {
            shared.terminals.push(state);
        } else {
            shared.worklist.push(state);
        }
    }
}

/// Marks a state as being stepped by a worker for as long as it lives.
///
/// Dropping it wakes the other workers, which may be waiting for the states it
/// produced or for the exploration to end. This also happens when the worker
/// panics, in which case the exploration is stopped.
struct InFlight<'a, 'b> {
    work: &'a Work<'b>,
}

impl Drop for InFlight<'_, '_> {
    fn drop(&mut self) {
        let mut shared = self.work.shared.lock();
        shared.in_flight -= 1;
        if std::thread::panicking() {
            let fault = FaultReport::new(Error::WorkerPanicked.locate(0), &"<worker>");
            shared.fault.get_or_insert(Box::new(fault));
        }
        drop(shared);
        self.work.wake.notify_all();
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{atomic::AtomicBool, Arc},
        time::Duration,
    };

    use crate::{
        error::{explorer, Error},
        explorer::{
            worklist::Strategy,
            Explorer,
            TerminationPolicy,
            UnexploredReason,
        },
        expr::SymbolicValue,
        opcode::{asm::Assembler, Opcode},
        solver::{Answer, Backend, Config, Solver, UnknownReason},
        vm::{outcome::OutcomeKind, test::state_for, Interpreter},
        watchdog::{FlagWatchdog, LazyWatchdog},
    };

    fn explorer() -> Explorer {
        Explorer::new(
            Interpreter::default(),
            Arc::new(Solver::builtin_only(Config::default())),
            LazyWatchdog.in_arc(),
        )
    }

    fn input(name: &str) -> Vec<SymbolicValue> {
        vec![SymbolicValue::fresh_symbol(8, name)]
    }

    /// Fails an assertion when the first calldata byte is `0x2a`.
    fn assert_not_42() -> anyhow::Result<Vec<u8>> {
        Ok(Assembler::new()
            .push(0u8)
            .op(Opcode::CallDataLoad)
            .push(0u8)
            .op(Opcode::Byte)
            .push(0x2au8)
            .op(Opcode::Eq)
            .push_label("fail")
            .op(Opcode::JumpI)
            .op(Opcode::Stop)
            .label("fail")
            .op(Opcode::Invalid(0xfe))
            .assemble()?)
    }

    #[test]
    fn explores_both_sides_of_a_branch() -> anyhow::Result<()> {
        let code = assert_not_42()?;
        let campaign =
            explorer().explore(vec![state_for(code, input("x"))], &TerminationPolicy::default())?;

        assert_eq!(campaign.terminals().len(), 2);
        assert_eq!(campaign.successes().count(), 1);
        assert_eq!(campaign.assertion_failures().count(), 1);
        assert_eq!(campaign.by_kind(OutcomeKind::Exception).len(), 1);
        assert!(campaign.is_complete());
        assert_eq!(campaign.statistics().forks, 1);

        let failing = campaign
            .terminals()
            .iter()
            .position(|s| s.is_violation())
            .ok_or_else(|| anyhow::anyhow!("No violation"))?;
        let testcase = campaign.concretize(failing)?;
        assert_eq!(testcase.transactions[0].calldata, vec![0x2a]);
        assert!(testcase.assertion_failure);

        Ok(())
    }

    #[test]
    fn prunes_infeasible_arms() -> anyhow::Result<()> {
        // Branching on `x == 1` and then on `x == 2` inside it leaves one arm
        // of the inner branch infeasible.
        let code = Assembler::new()
            .push(0u8)
            .op(Opcode::CallDataLoad)
            .push(0u8)
            .op(Opcode::Byte)
            .op(Opcode::Dup(1))
            .push(1u8)
            .op(Opcode::Eq)
            .push_label("one")
            .op(Opcode::JumpI)
            .op(Opcode::Stop)
            .label("one")
            .push(2u8)
            .op(Opcode::Eq)
            .push_label("two")
            .op(Opcode::JumpI)
            .op(Opcode::Stop)
            .label("two")
            .op(Opcode::Invalid(0xfe))
            .assemble()?;
        let campaign =
            explorer().explore(vec![state_for(code, input("x"))], &TerminationPolicy::default())?;

        assert_eq!(campaign.terminals().len(), 2);
        assert_eq!(campaign.assertion_failures().count(), 0);
        assert_eq!(campaign.statistics().pruned, 1);

        Ok(())
    }

    #[test]
    fn reports_states_over_the_step_bound() -> anyhow::Result<()> {
        let code = Assembler::new()
            .label("loop")
            .push_label("loop")
            .op(Opcode::Jump)
            .assemble()?;
        let policy = TerminationPolicy::new(Some(50), None, None)?;
        let campaign = explorer().explore(vec![state_for(code, vec![])], &policy)?;

        assert!(campaign.terminals().is_empty());
        assert_eq!(campaign.unexplored().len(), 1);
        assert_eq!(campaign.unexplored()[0].reason, UnexploredReason::StepBound);
        assert_eq!(campaign.unexplored()[0].state.steps(), 50);
        assert!(!campaign.is_complete());

        Ok(())
    }

    #[test]
    fn reports_arms_over_the_state_bound() -> anyhow::Result<()> {
        let code = assert_not_42()?;
        let policy = TerminationPolicy::default().with_max_states(2);
        let campaign = explorer().explore(vec![state_for(code, input("x"))], &policy)?;

        assert_eq!(campaign.terminals().len(), 1);
        assert_eq!(campaign.unexplored().len(), 1);
        assert_eq!(campaign.unexplored()[0].reason, UnexploredReason::StateBound);

        Ok(())
    }

    #[test]
    fn stops_when_the_watchdog_fires() -> anyhow::Result<()> {
        let flag = Arc::new(AtomicBool::new(true));
        let explorer = Explorer::new(
            Interpreter::default(),
            Arc::new(Solver::builtin_only(Config::default())),
            FlagWatchdog::new(flag).polling_every(1).in_arc(),
        );
        let code = assert_not_42()?;
        let campaign =
            explorer.explore(vec![state_for(code, input("x"))], &TerminationPolicy::default())?;

        assert!(campaign.terminals().is_empty());
        assert_eq!(campaign.unexplored().len(), 1);
        assert_eq!(campaign.unexplored()[0].reason, UnexploredReason::Cancelled);

        Ok(())
    }

    /// A backend that times out on every query.
    #[derive(Debug)]
    struct TimingOut;

    impl Backend for TimingOut {
        fn name(&self) -> &str {
            "timing-out"
        }

        fn check(&self, _: &[SymbolicValue], _: Duration) -> Answer {
            Answer::Unknown(UnknownReason::Timeout)
        }
    }

    #[test]
    fn arms_the_solver_cannot_afford_are_reported_unexplored() -> anyhow::Result<()> {
        // Branching on `x * x == 2` over a full word is beyond the built-in
        // backend, so that arm needs an external query.
        let x = SymbolicValue::fresh_symbol(256, "x");
        let calldata = (0..32).map(|i| x.byte_at(i)).collect::<Result<Vec<_>, _>>()?;
        let code = Assembler::new()
            .push(0u8)
            .op(Opcode::CallDataLoad)
            .op(Opcode::Dup(1))
            .op(Opcode::Mul)
            .push(2u8)
            .op(Opcode::Eq)
            .push_label("square")
            .op(Opcode::JumpI)
            .op(Opcode::Stop)
            .label("square")
            .op(Opcode::Invalid(0xfe))
            .assemble()?;
        let config = Config::default().with_query_budget(0);
        let solver = Solver::with_backend(config, Box::new(TimingOut));
        let explorer =
            Explorer::new(Interpreter::default(), Arc::new(solver), LazyWatchdog.in_arc());
        let campaign =
            explorer.explore(vec![state_for(code, calldata)], &TerminationPolicy::default())?;

        assert_eq!(campaign.terminals().len(), 1);
        assert_eq!(campaign.assertion_failures().count(), 0);
        assert_eq!(campaign.unexplored().len(), 1);
        assert_eq!(campaign.unexplored()[0].reason, UnexploredReason::SolverExhausted);
        assert!(!campaign.is_complete());

        Ok(())
    }

    #[test]
    fn stops_when_the_time_budget_runs_out() -> anyhow::Result<()> {
        let code = assert_not_42()?;
        let policy = TerminationPolicy::default().with_wall_clock(Duration::ZERO);
        let campaign = explorer().explore(vec![state_for(code, input("x"))], &policy)?;

        assert!(campaign.terminals().is_empty());
        assert_eq!(campaign.unexplored().len(), 1);
        assert_eq!(campaign.unexplored()[0].reason, UnexploredReason::TimeBudget);
        assert!(!campaign.is_complete());

        Ok(())
    }

    #[test]
    fn rejects_unbounded_policies() {
        let policy = TerminationPolicy {
            max_steps_per_state: None,
            ..TerminationPolicy::default()
        };
        let result = explorer().explore(vec![], &policy);
        assert!(matches!(
            result,
            Err(Error::Explorer(explorer::Error::Unbounded))
        ));
    }

    #[test]
    fn worker_count_does_not_change_the_results() -> anyhow::Result<()> {
        // Two independent branches give four paths.
        let code = Assembler::new()
            .push(0u8)
            .op(Opcode::CallDataLoad)
            .push(0u8)
            .op(Opcode::Byte)
            .push_label("a")
            .op(Opcode::JumpI)
            .label("a")
            .push(0u8)
            .op(Opcode::CallDataLoad)
            .push(1u8)
            .op(Opcode::Byte)
            .push_label("b")
            .op(Opcode::JumpI)
            .label("b")
            .op(Opcode::Stop)
            .assemble()?;
        let calldata = vec![
            SymbolicValue::fresh_symbol(8, "a"),
            SymbolicValue::fresh_symbol(8, "b"),
        ];

        for (workers, strategy) in [
            (1, Strategy::Fifo),
            (4, Strategy::Lifo),
            (3, Strategy::Random { seed: 7 }),
        ] {
            let policy = TerminationPolicy::default()
                .with_workers(workers)
                .with_strategy(strategy);
            let campaign =
                explorer().explore(vec![state_for(code.clone(), calldata.clone())], &policy)?;
            assert_eq!(campaign.terminals().len(), 4);
            assert_eq!(campaign.statistics().forks, 3);
            assert!(campaign.is_complete());
        }

        Ok(())
    }
}
