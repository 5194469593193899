//! This module contains the [`Engine`], the interface through which a driver
//! sets up accounts and contracts, queues transactions against them and runs
//! those transactions through the explorer.
//!
//! # Transaction Sequencing
//!
//! The engine keeps a set of ready states, starting with a single state over
//! an empty world. Running a transaction starts it from every ready state and
//! explores the result. The states in which it returned successfully become
//! the ready states for the next transaction, while those in which it reverted
//! or failed are final and are reported in the [`Campaign`] returned by
//! [`Engine::run`].
//!
//! A state in which a transaction cannot be run at all, because the caller
//! cannot fund the value it sends or one of its preconditions cannot hold,
//! skips that transaction and stays ready.

pub mod abi;
pub mod contract;
pub mod transaction;

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    constant::{DEFAULT_BOUND_SYMBOLIC_ARGUMENTS, FIRST_ACCOUNT_ADDRESS, WORD_SIZE_BITS},
    disassembly::Program,
    error::{harness::Error, Result},
    explorer::{Campaign, Explorer, Statistics, TerminationPolicy},
    expr::{SymbolicValue, Width},
    harness::{
        abi::{encode, encode_call, Value},
        contract::Contract,
        transaction::{AccountHandle, ContractHandle, PendingExecution, Transaction},
    },
    solver::{self, SatResult, Solver},
    vm::{
        self,
        outcome::Outcome,
        state::{concrete_bytes, Environment, ExecutionState, Frame, FrameKind},
        Interpreter,
    },
    watchdog::{DynWatchdog, LazyWatchdog},
    world::{Address, WorldState},
};

/// The configuration for the [`Engine`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The configuration of the interpreter that runs transactions.
    pub interpreter: vm::Config,

    /// The configuration of the solver that checks paths.
    pub solver: solver::Config,

    /// Whether symbolic arguments to functions resolved from an ABI are
    /// constrained to the range of their declared type. When this is off, a
    /// symbolic `uint8` argument may hold any word, and it is up to the
    /// contract to reject values that are out of range.
    ///
    /// Defaults to [`DEFAULT_BOUND_SYMBOLIC_ARGUMENTS`].
    pub bound_symbolic_arguments: bool,

    /// The bounds on running constructors, which happens as soon as a
    /// contract is deployed.
    pub deployment_policy: TerminationPolicy,
}

impl Config {
    /// Sets the interpreter config to `value`.
    #[must_use]
    pub fn with_interpreter(mut self, value: vm::Config) -> Self {
        self.interpreter = value;
        self
    }

    /// Sets the solver config to `value`.
    #[must_use]
    pub fn with_solver(mut self, value: solver::Config) -> Self {
        self.solver = value;
        self
    }

    /// Sets the `bound_symbolic_arguments` config parameter to `value`.
    #[must_use]
    pub fn with_bound_symbolic_arguments(mut self, value: bool) -> Self {
        self.bound_symbolic_arguments = value;
        self
    }

    /// Sets the policy used to run constructors to `value`.
    #[must_use]
    pub fn with_deployment_policy(mut self, value: TerminationPolicy) -> Self {
        self.deployment_policy = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interpreter:              vm::Config::default(),
            solver:                   solver::Config::default(),
            bound_symbolic_arguments: DEFAULT_BOUND_SYMBOLIC_ARGUMENTS,
            deployment_policy:        TerminationPolicy::default(),
        }
    }
}

/// The driver-facing interface to the engine.
///
/// ```
/// use evm_path_explorer::{
///     expr::SymbolicValue,
///     harness::{Config, Engine},
///     explorer::TerminationPolicy,
/// };
///
/// let mut engine = Engine::new(Config::default());
/// let user = engine.create_account(SymbolicValue::word(1_000u64)).unwrap();
/// assert_eq!(engine.ready_states(), 1);
///
/// let campaign = engine.run(&TerminationPolicy::default()).unwrap();
/// assert_eq!(campaign.terminals().len(), 1);
/// assert!(campaign.terminals()[0].world().contains(user.address()));
/// ```
#[derive(Debug)]
pub struct Engine {
    config:       Config,
    explorer:     Explorer,
    ready:        Vec<ExecutionState>,
    pending:      Vec<Transaction>,
    results:      Option<Campaign>,
    contracts:    BTreeMap<Address, Contract>,
    next_account: u64,
    sequence:     usize,
}

impl Engine {
    /// Constructs an engine over an empty world, with a solver built from the
    /// solver config in `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let solver = Arc::new(Solver::new(config.solver.clone()));
        Self::with_solver(config, solver)
    }

    /// Constructs an engine over an empty world that checks paths with
    /// `solver`.
    #[must_use]
    pub fn with_solver(config: Config, solver: Arc<Solver>) -> Self {
        let explorer = Explorer::new(
            Interpreter::new(config.interpreter.clone()),
            solver,
            LazyWatchdog.in_arc(),
        );
        Self {
            config,
            explorer,
            ready: vec![ExecutionState::genesis(WorldState::new())],
            pending: Vec::new(),
            results: None,
            contracts: BTreeMap::new(),
            next_account: FIRST_ACCOUNT_ADDRESS,
            sequence: 0,
        }
    }

    /// Sets the watchdog that can stop the engine's explorations early.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: DynWatchdog) -> Self {
        self.explorer = Explorer::new(
            self.explorer.interpreter().clone(),
            self.explorer.solver().clone(),
            watchdog,
        );
        self
    }

    /// Gets the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the solver shared by the engine's explorations.
    #[must_use]
    pub fn solver(&self) -> &Arc<Solver> {
        self.explorer.solver()
    }

    /// Gets the number of states that the next transaction will start from.
    #[must_use]
    pub fn ready_states(&self) -> usize {
        self.ready.len()
    }

    /// Gets the states that the next transaction will start from.
    #[must_use]
    pub fn states(&self) -> &[ExecutionState] {
        &self.ready
    }

    /// Gets the number of transactions waiting to be run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Creates an externally owned account holding `balance` in every ready
    /// state.
    ///
    /// The account exists as soon as this returns, including for transactions
    /// that were queued before it.
    ///
    /// # Errors
    ///
    /// If there are no ready states.
    pub fn create_account(&mut self, balance: SymbolicValue) -> Result<AccountHandle> {
        if self.ready.is_empty() {
            return Err(Error::NoReadyStates.into());
        }
        let balance = if balance.width() < WORD_SIZE_BITS {
            balance.zero_extend(WORD_SIZE_BITS)?
        } else {
            balance
        };

        let mut address = Address::from(self.next_account);
        while self.ready.iter().any(|s| s.world().contains(address)) {
            self.next_account += 1;
            address = Address::from(self.next_account);
        }
        self.next_account += 1;

        for state in &mut self.ready {
            state.world = state.world.create_account(address, balance.clone());
        }
        tracing::info!(%address, %balance, "Created account");
        Ok(AccountHandle::new(address))
    }

    /// Deploys `contract` from `deployer`, passing `constructor_args` and
    /// sending `value`.
    ///
    /// Any queued transactions are run first, and the constructor is then run
    /// straight away under the deployment policy of the config. Its successful
    /// paths become the ready states, while its failed paths are reported by
    /// the next call to [`Self::run`].
    ///
    /// # Errors
    ///
    /// If the deployer is unknown, the constructor arguments cannot be
    /// encoded, or no path of the constructor succeeds.
    pub fn deploy_contract(
        &mut self,
        contract: &Contract,
        deployer: &AccountHandle,
        constructor_args: &[Value],
        value: SymbolicValue,
    ) -> Result<ContractHandle> {
        let policy = self.config.deployment_policy.clone();
        self.drain(&policy)?;

        let deployer = deployer.address();
        self.check_caller(deployer)?;
        let mut nonces = self.ready.iter().map(|s| s.world().nonce(deployer));
        let nonce = nonces.next().ok_or(Error::NoReadyStates)?;
        if nonces.any(|n| n != nonce) {
            return Err(Error::DivergentDeployment.into());
        }
        let address = deployer.create(nonce);

        let types = match contract.abi().and_then(|abi| abi.constructor()) {
            Some(constructor) => constructor.input_types()?,
            None => constructor_args.iter().map(Value::natural_type).collect(),
        };
        let encoded = encode(&types, constructor_args, false)?;
        let args = concrete_bytes(&encoded.data).ok_or(Error::SymbolicConstructorArguments)?;
        let mut code = contract.bytecode().to_vec();
        code.extend(args);
        let init_code = Arc::new(Program::new(code)?);

        self.pending
            .push(Transaction::deploy(deployer, address, init_code, value));
        self.drain(&policy)?;

        if !self
            .ready
            .iter()
            .any(|s| s.world().account(address).is_some_and(|a| a.is_contract()))
        {
            return Err(Error::DeploymentFailed { address }.into());
        }
        self.contracts.insert(address, contract.clone());
        tracing::info!(
            name = contract.name(),
            %address,
            states = self.ready.len(),
            "Deployed contract"
        );
        Ok(ContractHandle::new(address))
    }

    /// Creates a new symbolic value of `width` bits that is distinct from
    /// every other value.
    #[must_use]
    pub fn fresh_symbolic_value(&self, width: Width, name_hint: impl Into<String>) -> SymbolicValue {
        SymbolicValue::fresh_symbol(width, name_hint)
    }

    /// Queues a call of the function with `selector` on `contract`.
    ///
    /// Without an ABI to go by, every word in `args` is encoded as a
    /// `uint256` and is not bounded.
    ///
    /// # Errors
    ///
    /// If the contract or caller are unknown, or the arguments cannot be
    /// encoded.
    pub fn invoke(
        &mut self,
        contract: &ContractHandle,
        selector: [u8; 4],
        args: &[Value],
        caller: &AccountHandle,
        value: SymbolicValue,
    ) -> Result<PendingExecution> {
        let target = self.known_contract(contract)?.0;
        let types: Vec<_> = args.iter().map(Value::natural_type).collect();
        let encoded = encode_call(selector, &types, args, false)?;
        let transaction =
            Transaction::call(caller.address(), target, encoded.data).with_value(value);
        self.submit(transaction)
    }

    /// Queues a call of the function named `function` on `contract`, which is
    /// either a bare name or a full signature, resolved against the
    /// contract's ABI.
    ///
    /// Symbolic arguments are bounded to their declared types if the config
    /// says so.
    ///
    /// # Errors
    ///
    /// If the contract or caller are unknown, the contract has no ABI, the
    /// function cannot be resolved, or the arguments do not match it.
    pub fn invoke_function(
        &mut self,
        contract: &ContractHandle,
        function: &str,
        args: &[Value],
        caller: &AccountHandle,
        value: SymbolicValue,
    ) -> Result<PendingExecution> {
        let (target, known) = self.known_contract(contract)?;
        let abi = known.abi().ok_or_else(|| Error::MissingAbi(function.into()))?;
        let function = abi.function(function)?;
        let signature = function.signature()?;
        let types = function.input_types()?;
        if types.len() != args.len() {
            return Err(Error::ArgumentCount {
                function: signature,
                expected: types.len(),
                found:    args.len(),
            }
            .into());
        }

        let encoded = encode_call(
            function.selector()?,
            &types,
            args,
            self.config.bound_symbolic_arguments,
        )?;
        let transaction = encoded.constraints.into_iter().fold(
            Transaction::call(caller.address(), target, encoded.data)
                .with_value(value)
                .with_function(signature),
            Transaction::requiring,
        );
        self.submit(transaction)
    }

    /// Queues `transaction` to be run after every transaction queued before
    /// it.
    ///
    /// # Errors
    ///
    /// If there are no ready states, or the caller does not exist in any of
    /// them.
    pub fn submit(&mut self, transaction: Transaction) -> Result<PendingExecution> {
        self.check_caller(transaction.caller())?;
        let handle = PendingExecution {
            sequence: self.sequence,
            target:   transaction.target(),
        };
        tracing::debug!(%transaction, sequence = self.sequence, "Queued transaction");
        self.sequence += 1;
        self.pending.push(transaction);
        Ok(handle)
    }

    /// Requires `constraint` to hold in every ready state from now on.
    ///
    /// Ready states in which it cannot hold are discarded.
    ///
    /// # Errors
    ///
    /// If the constraint cannot be read as a predicate.
    pub fn constrain(&mut self, constraint: &SymbolicValue) -> Result<()> {
        let predicate = constraint.truthy()?;
        let mut kept = Vec::with_capacity(self.ready.len());
        for state in &self.ready {
            let mut state = state.clone();
            state.world = state.world.with_constraint(predicate.clone())?;
            state.path = state.path.with(predicate.clone())?;
            match self.solver().is_satisfiable(&state.path) {
                SatResult::Sat => kept.push(state),
                SatResult::Unsat => {
                    tracing::debug!(id = %state.id(), "Discarded a ready state under a new constraint");
                }
                SatResult::Unknown(reason) => {
                    state.flag(reason);
                    kept.push(state);
                }
            }
        }
        self.ready = kept;
        Ok(())
    }

    /// Runs every queued transaction in order, exploring each under
    /// `policy`.
    ///
    /// The returned campaign holds the paths that failed in any transaction
    /// since the last run, including failed deployments, the states left
    /// unexplored, and the ready states that the last transaction produced.
    ///
    /// # Errors
    ///
    /// If the policy cannot terminate, or the engine faults.
    pub fn run(&mut self, policy: &TerminationPolicy) -> Result<Campaign> {
        policy.validate()?;
        self.drain(policy)?;
        let mut campaign = self.results.take().unwrap_or_else(|| {
            Campaign::new(
                Vec::new(),
                Vec::new(),
                Statistics::default(),
                self.solver().clone(),
            )
        });
        campaign.extend_terminals(self.ready.iter().cloned());
        Ok(campaign)
    }

    /// Runs every queued transaction, keeping their failures for the next
    /// call to [`Self::run`].
    ///
    /// If a transaction faults, it is dropped and the transactions queued
    /// after it stay queued, to run from the ready states it started from.
    fn drain(&mut self, policy: &TerminationPolicy) -> Result<()> {
        let mut queue = std::mem::take(&mut self.pending).into_iter();
        while let Some(transaction) = queue.next() {
            if let Err(error) = self.run_transaction(&transaction, policy) {
                tracing::warn!(%transaction, %error, "Transaction faulted");
                self.pending.extend(queue);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Runs `transaction` from every ready state, replacing the ready states
    /// with its successful terminals.
    fn run_transaction(
        &mut self,
        transaction: &Transaction,
        policy: &TerminationPolicy,
    ) -> Result<()> {
        let mut initial = Vec::with_capacity(self.ready.len());
        let mut skipped = Vec::new();
        for state in &self.ready {
            match self.start(state, transaction)? {
                Some(started) => initial.push(started),
                None => skipped.push(state.clone()),
            }
        }
        tracing::info!(
            %transaction,
            states = initial.len(),
            skipped = skipped.len(),
            "Running transaction"
        );

        let mut campaign = self.explorer.explore(initial, policy)?;
        let successes =
            campaign.take_terminals(|s| s.outcome().is_some_and(Outcome::is_success));
        self.ready = skipped;
        self.ready.extend(successes);

        match &mut self.results {
            Some(results) => results.absorb(campaign),
            None => self.results = Some(campaign),
        }
        Ok(())
    }

    /// Builds the state that runs `transaction` from the ready `state`, or
    /// returns [`None`] if the transaction cannot run there.
    fn start(
        &self,
        state: &ExecutionState,
        transaction: &Transaction,
    ) -> Result<Option<ExecutionState>> {
        let caller = transaction.caller();
        let target = transaction.target();
        let checkpoint = state.world().increment_nonce(caller);

        let (world, program, kind) = match &transaction.init_code {
            Some(init_code) => {
                if checkpoint
                    .account(target)
                    .is_some_and(|a| a.is_contract() || a.nonce() > 0)
                {
                    tracing::warn!(%target, "Skipping a deployment to an address in use");
                    return Ok(None);
                }
                let world = checkpoint
                    .create_account(target, checkpoint.balance(target))
                    .increment_nonce(target);
                (world, init_code.clone(), FrameKind::Deployment { address: target })
            }
            None => (checkpoint.clone(), checkpoint.code(target), FrameKind::Transaction),
        };

        let transfer = world.transfer(caller, target, transaction.value())?;
        let mut path = state.path().with(transfer.obligation)?;
        for precondition in transaction.preconditions() {
            path = path.with(precondition.clone())?;
        }
        if path.is_trivially_false() {
            tracing::debug!(id = %state.id(), %transaction, "Skipping a transaction that cannot run");
            return Ok(None);
        }

        let mut undecided = None;
        if path.len() > state.path().len() {
            match self.solver().is_satisfiable(&path) {
                SatResult::Sat => (),
                SatResult::Unsat => {
                    tracing::debug!(id = %state.id(), %transaction, "Skipping a transaction that cannot run");
                    return Ok(None);
                }
                SatResult::Unknown(reason) => undecided = Some(reason),
            }
        }

        let env = Environment {
            address: target,
            caller,
            origin: caller,
            value: transaction.value().clone(),
            calldata: transaction.calldata.clone(),
            is_static: false,
        };
        let frame = Frame::new(
            program,
            env,
            kind,
            checkpoint,
            0,
            self.config.interpreter.max_memory_bytes,
        );
        let mut started = state.start_transaction(
            transaction.record(),
            frame,
            transfer.world,
            path,
            self.config.interpreter.gas_limit,
        );
        if let Some(reason) = undecided {
            started.flag(reason);
        }
        Ok(Some(started))
    }

    /// Checks that `caller` can send transactions.
    fn check_caller(&self, caller: Address) -> Result<()> {
        if self.ready.is_empty() {
            return Err(Error::NoReadyStates.into());
        }
        if !self.ready.iter().any(|s| s.world().contains(caller)) {
            return Err(Error::UnknownAccount(caller).into());
        }
        Ok(())
    }

    /// Gets the address and description of the deployed `contract`.
    fn known_contract(&self, contract: &ContractHandle) -> Result<(Address, &Contract)> {
        let address = contract.address();
        let known = self
            .contracts
            .get(&address)
            .ok_or(Error::UnknownAccount(address))?;
        let has_code = |s: &ExecutionState| {
            s.world()
                .account(address)
                .is_some_and(|a| a.is_contract())
        };
        if !self.ready.is_empty() && !self.ready.iter().any(has_code) {
            return Err(Error::NoCode(address).into());
        }
        Ok((address, known))
    }
}

/// Wraps `runtime` in creation code that returns it.
#[must_use]
pub fn creation_code(runtime: &[u8]) -> Vec<u8> {
    // PUSH2 len, PUSH1 offset, PUSH1 0, CODECOPY, PUSH2 len, PUSH1 0, RETURN
    const PREFIX_LEN: u8 = 14;
    let len = u16::try_from(runtime.len()).unwrap_or(u16::MAX).to_be_bytes();
    let mut code = vec![
        0x61, len[0], len[1], 0x60, PREFIX_LEN, 0x60, 0x00, 0x39, 0x61, len[0], len[1], 0x60,
        0x00, 0xf3,
    ];
    code.extend_from_slice(runtime);
    code
}
