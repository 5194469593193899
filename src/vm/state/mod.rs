//! This module contains the [`ExecutionState`], the complete snapshot of one
//! execution path at one point in time.

pub mod memory;
pub mod stack;

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use ethnum::U256;
use uuid::Uuid;

use crate::{
    constant::{BYTE_SIZE_BITS, CODE_DEPOSIT_GAS_PER_BYTE, CONTRACT_MAXIMUM_SIZE_BYTES},
    disassembly::Program,
    expr::SymbolicValue,
    solver::UnknownReason,
    vm::{
        outcome::{ExceptionKind, Log, Outcome},
        path::PathCondition,
        state::{memory::Memory, stack::Stack},
        Interrupt,
    },
    world::{Address, WorldState},
};

/// The context that a frame executes in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Environment {
    /// The account whose storage and balance the frame acts on.
    pub address: Address,

    /// The account that called into the frame.
    pub caller: Address,

    /// The account that signed the transaction.
    pub origin: Address,

    /// The value sent with the call.
    pub value: SymbolicValue,

    /// The input to the frame as byte-wide values.
    pub calldata: Vec<SymbolicValue>,

    /// Whether state changes are forbidden.
    pub is_static: bool,
}

/// What a frame was entered for, which decides what happens when it halts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameKind {
    /// The outermost frame of a transaction that calls an account.
    Transaction,

    /// The outermost frame of a transaction that deploys a contract to
    /// `address`.
    Deployment { address: Address },

    /// A message call, whose returned data is copied into the caller's memory
    /// at `return_offset`, up to `return_size` bytes.
    Call {
        return_offset: usize,
        return_size:   usize,
    },

    /// A `CREATE` or `CREATE2` of a contract at `address`.
    Create { address: Address },
}

impl FrameKind {
    /// Gets the address of the contract being created, if any.
    #[must_use]
    pub fn created_address(&self) -> Option<Address> {
        match self {
            Self::Deployment { address } | Self::Create { address } => Some(*address),
            _ => None,
        }
    }
}

/// A single call frame: the code being run and the machine state that is
/// private to it.
#[derive(Clone, Debug)]
pub struct Frame {
    pub(crate) program: Arc<Program>,
    pub(crate) pc:      usize,
    pub(crate) stack:   Stack,
    pub(crate) memory:  Memory,
    pub(crate) env:     Environment,
    pub(crate) kind:    FrameKind,

    /// The world and log count to roll back to if the frame fails.
    pub(crate) checkpoint_world: WorldState,
    pub(crate) checkpoint_logs:  usize,
}

impl Frame {
    /// Constructs a frame that starts running `program` at its first byte.
    ///
    /// `world` is the state that is restored if the frame reverts.
    #[must_use]
    pub fn new(
        program: Arc<Program>,
        env: Environment,
        kind: FrameKind,
        world: WorldState,
        logs: usize,
        memory_limit: usize,
    ) -> Self {
        Self {
            program,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(memory_limit),
            env,
            kind,
            checkpoint_world: world,
            checkpoint_logs: logs,
        }
    }

    /// Gets the program being run.
    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Gets the program counter as a byte offset.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Gets the frame's stack.
    #[must_use]
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Gets the frame's memory.
    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Gets the frame's environment.
    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Gets what the frame was entered for.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }
}

/// The kind of a transaction run by the harness.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TransactionKind {
    Deploy,
    Call,
}

/// A record of a transaction that an execution path has run, with its inputs
/// kept symbolic so that a model of the path can concretise them later.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransactionRecord {
    pub kind:     TransactionKind,
    pub caller:   Address,
    pub target:   Address,
    pub calldata: Vec<SymbolicValue>,
    pub value:    SymbolicValue,

    /// The signature of the function called, when it was resolved from an
    /// ABI.
    pub function: Option<String>,
}

impl TransactionRecord {
    /// Gets every input value of the transaction: its calldata bytes followed
    /// by its value.
    #[must_use]
    pub fn inputs(&self) -> Vec<SymbolicValue> {
        let mut inputs = self.calldata.clone();
        inputs.push(self.value.clone());
        inputs
    }
}

/// A note that a branch of the path was taken without the solver deciding
/// that it was feasible.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SolverFlag {
    /// The number of steps the path had taken when it branched.
    pub step: usize,

    /// The program counter of the branching instruction.
    pub pc: usize,

    /// Why the solver could not decide the branch.
    pub reason: UnknownReason,
}

/// A snapshot of one execution path.
///
/// States are plain values. Cloning one produces an independent path that
/// shares the unchanged parts of its world, path condition and memory with the
/// original, and nothing done to either afterwards is visible in the other.
///
/// A state is terminal once it has an [`Outcome`], at which point it can no
/// longer be stepped. A successful terminal state is also where the next
/// transaction in a sequence starts from.
#[derive(Clone)]
pub struct ExecutionState {
    pub(crate) id:           Uuid,
    pub(crate) parent:       Option<Uuid>,
    pub(crate) frame:        Frame,
    pub(crate) call_stack:   Vec<Frame>,
    pub(crate) world:        WorldState,
    pub(crate) path:         PathCondition,
    pub(crate) outcome:      Option<Outcome>,
    pub(crate) steps:        usize,
    pub(crate) gas_used:     u64,
    pub(crate) gas_limit:    u64,
    pub(crate) logs:         Vec<Log>,
    pub(crate) return_data:  Vec<SymbolicValue>,
    pub(crate) solver_flags: Vec<SolverFlag>,
    pub(crate) transactions: Vec<TransactionRecord>,
}

impl ExecutionState {
    /// Constructs the state that every transaction sequence begins from.
    ///
    /// It holds `world` and counts as a successful terminal state, so that it
    /// is ready to start a transaction.
    #[must_use]
    pub fn genesis(world: WorldState) -> Self {
        let env = Environment {
            address:  Address::default(),
            caller:   Address::default(),
            origin:   Address::default(),
            value:    SymbolicValue::word(0u8),
            calldata: Vec::new(),
            is_static: false,
        };
        let frame = Frame::new(
            Arc::new(Program::empty()),
            env,
            FrameKind::Transaction,
            world.clone(),
            0,
            0,
        );
        Self {
            id: Uuid::new_v4(),
            parent: None,
            frame,
            call_stack: Vec::new(),
            world,
            path: PathCondition::new(),
            outcome: Some(Outcome::stop()),
            steps: 0,
            gas_used: 0,
            gas_limit: 0,
            logs: Vec::new(),
            return_data: Vec::new(),
            solver_flags: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// Constructs the state that runs a transaction from this one.
    ///
    /// The new state keeps the world, path condition and transaction history
    /// of `self`, with `world` and `path` replacing them where the caller has
    /// already applied the effects of starting the transaction, such as the
    /// value transfer. It starts running `frame` with no gas used.
    #[must_use]
    pub fn start_transaction(
        &self,
        record: TransactionRecord,
        frame: Frame,
        world: WorldState,
        path: PathCondition,
        gas_limit: u64,
    ) -> Self {
        let mut transactions = self.transactions.clone();
        transactions.push(record);
        Self {
            id: Uuid::new_v4(),
            parent: Some(self.id),
            frame,
            call_stack: Vec::new(),
            world,
            path,
            outcome: None,
            steps: 0,
            gas_used: 0,
            gas_limit,
            logs: Vec::new(),
            return_data: Vec::new(),
            solver_flags: self.solver_flags.clone(),
            transactions,
        }
    }

    /// Gets the unique identifier of the state.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Gets the identifier of the state this one was forked or started from.
    #[must_use]
    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    /// Gets the currently executing frame.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Gets the suspended caller frames, outermost first.
    #[must_use]
    pub fn call_stack(&self) -> &[Frame] {
        &self.call_stack
    }

    /// Gets the depth of the current frame, where the transaction's frame is
    /// at depth zero.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Gets the program counter of the current frame.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.frame.pc
    }

    /// Gets the world state as seen by the path.
    #[must_use]
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Gets the path condition.
    #[must_use]
    pub fn path(&self) -> &PathCondition {
        &self.path
    }

    /// Gets the outcome, if the state is terminal.
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Checks if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Gets the number of steps taken in the current transaction.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Gets the gas used by the current transaction.
    #[must_use]
    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// Gets the logs emitted by the current transaction.
    #[must_use]
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Gets the data returned by the most recent call or creation.
    #[must_use]
    pub fn return_data(&self) -> &[SymbolicValue] {
        &self.return_data
    }

    /// Gets the branches that were taken without the solver deciding them.
    #[must_use]
    pub fn solver_flags(&self) -> &[SolverFlag] {
        &self.solver_flags
    }

    /// Gets the transactions that the path has run, oldest first.
    #[must_use]
    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    /// Gets every symbolic input of every transaction on the path.
    #[must_use]
    pub fn inputs(&self) -> Vec<SymbolicValue> {
        self.transactions.iter().flat_map(TransactionRecord::inputs).collect()
    }

    /// Checks if the path ended in a failed assertion.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        self.outcome.as_ref().is_some_and(Outcome::is_assertion_failure)
    }

    /// Records that a branch was taken without a decided solver answer.
    pub(crate) fn flag(&mut self, reason: UnknownReason) {
        self.solver_flags.push(SolverFlag {
            step: self.steps,
            pc: self.frame.pc,
            reason,
        });
    }

    /// Replaces the identity of the state with a fresh one descending from
    /// `parent`.
    pub(crate) fn reidentify(&mut self, parent: Uuid) {
        self.id = Uuid::new_v4();
        self.parent = Some(parent);
    }

    /// Charges `amount` gas to the transaction.
    ///
    /// # Errors
    ///
    /// If the transaction's gas limit is exceeded.
    pub(crate) fn charge_gas(&mut self, amount: u64) -> Result<(), ExceptionKind> {
        self.gas_used = self.gas_used.saturating_add(amount);
        if self.gas_used > self.gas_limit {
            return Err(ExceptionKind::OutOfGas);
        }
        Ok(())
    }

    /// Validates a memory access of `size` bytes at `offset` in the current
    /// frame, expanding the memory and charging for it.
    ///
    /// Returns the concrete offset and size.
    ///
    /// # Errors
    ///
    /// If either operand is symbolic, the memory would grow past its limit, or
    /// the expansion runs out of gas.
    pub(crate) fn memory_range(
        &mut self,
        offset: &SymbolicValue,
        size: &SymbolicValue,
    ) -> Result<(usize, usize), ExceptionKind> {
        let size = concrete_usize(size)?;
        if size == 0 {
            return Ok((0, 0));
        }
        let offset = concrete_usize(offset)?;
        let cost = self.frame.memory.expand(offset, size)?;
        self.charge_gas(cost)?;
        Ok((offset, size))
    }

    /// Ends the current frame with `outcome`.
    ///
    /// Halting the outermost frame makes the state terminal. Halting a nested
    /// frame returns control to its caller, rolling the world back unless the
    /// frame succeeded and pushing the success flag (or created address) onto
    /// the caller's stack.
    ///
    /// # Errors
    ///
    /// If handing the result back to the caller fails. The caller is expected
    /// to end the path when this happens.
    pub(crate) fn halt(&mut self, outcome: Outcome) -> Result<(), Interrupt> {
        let outcome = match (self.frame.kind.created_address(), outcome) {
            (Some(address), Outcome::Return { data }) => self.deposit_code(address, &data)?,
            (_, outcome) => outcome,
        };

        let Some(caller) = self.call_stack.pop() else {
            if !outcome.is_success() {
                self.world = self.frame.checkpoint_world.clone();
                self.logs.truncate(self.frame.checkpoint_logs);
            }
            self.outcome = Some(outcome);
            return Ok(());
        };

        let callee = std::mem::replace(&mut self.frame, caller);
        let success = outcome.is_success();
        if !success {
            self.world = callee.checkpoint_world;
            self.logs.truncate(callee.checkpoint_logs);
        }

        match callee.kind {
            FrameKind::Call {
                return_offset,
                return_size,
            } => {
                let data = outcome.data();
                let copied = return_size.min(data.len());
                self.frame.memory.write(return_offset, &data[..copied]);
                self.return_data = data.to_vec();
                self.frame.stack.push(SymbolicValue::word(u8::from(success)))?;
            }
            FrameKind::Create { address } | FrameKind::Deployment { address } => {
                self.return_data = match &outcome {
                    Outcome::Revert { data } => data.clone(),
                    _ => Vec::new(),
                };
                let result = if success { address.as_word() } else { SymbolicValue::word(0u8) };
                self.frame.stack.push(result)?;
            }
            FrameKind::Transaction => (),
        }

        tracing::trace!(%outcome, depth = self.depth(), "Returned to caller frame");
        Ok(())
    }

    /// Ends the whole path with the exception `kind`, whatever the depth of
    /// the current frame.
    pub(crate) fn terminate(&mut self, kind: ExceptionKind) {
        let root = self.call_stack.first().unwrap_or(&self.frame);
        self.world = root.checkpoint_world.clone();
        self.logs.truncate(root.checkpoint_logs);
        self.call_stack.clear();
        self.outcome = Some(Outcome::Exception { kind });
    }

    /// Installs the code returned by a creating frame at `address`, producing
    /// the outcome of the frame.
    fn deposit_code(&mut self, address: Address, data: &[SymbolicValue]) -> Result<Outcome, Interrupt> {
        let code = concrete_bytes(data).ok_or(ExceptionKind::SymbolicCode)?;
        if code.len() > CONTRACT_MAXIMUM_SIZE_BYTES {
            return Ok(Outcome::Exception {
                kind: ExceptionKind::CodeSizeExceeded,
            });
        }
        let length = u64::try_from(code.len()).unwrap_or(u64::MAX);
        let deposit = CODE_DEPOSIT_GAS_PER_BYTE.saturating_mul(length);
        self.charge_gas(deposit)?;
        let program = Program::new(code).map_err(|_| ExceptionKind::CodeSizeExceeded)?;
        self.world = self.world.deploy_code(address, Arc::new(program));
        Ok(Outcome::stop())
    }
}

impl Debug for ExecutionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionState")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("depth", &self.depth())
            .field("pc", &self.frame.pc)
            .field("opcode", &self.frame.program.instruction(self.frame.pc))
            .field("address", &self.frame.env.address)
            .field("stack", &self.frame.stack)
            .field("path", &self.path)
            .field("outcome", &self.outcome)
            .field("steps", &self.steps)
            .field("gas_used", &self.gas_used)
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}

/// Gets `value` as a concrete `usize`.
///
/// Values too large for a `usize` are reported as exceeding the memory limit,
/// as no offset of that size can be accessed.
///
/// # Errors
///
/// If the value is symbolic or too large.
pub(crate) fn concrete_usize(value: &SymbolicValue) -> Result<usize, ExceptionKind> {
    let value = value.as_concrete().ok_or(ExceptionKind::SymbolicOffset)?;
    usize::try_from(value).map_err(|_| ExceptionKind::MemoryLimit)
}

/// Gets byte-wide `values` as concrete bytes, if they all are.
#[must_use]
pub fn concrete_bytes(values: &[SymbolicValue]) -> Option<Vec<u8>> {
    values
        .iter()
        .map(|v| {
            debug_assert_eq!(v.width(), BYTE_SIZE_BITS);
            v.as_concrete().and_then(|b| u8::try_from(b).ok())
        })
        .collect()
}

/// Splits `bytes` into byte-wide concrete values.
#[must_use]
pub fn symbolic_bytes(bytes: &[u8]) -> Vec<SymbolicValue> {
    bytes
        .iter()
        .map(|b| SymbolicValue::constant(U256::from(*b), BYTE_SIZE_BITS))
        .collect()
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ethnum::U256;

    use crate::{
        disassembly::Program,
        expr::SymbolicValue,
        vm::{
            outcome::{ExceptionKind, Outcome},
            state::{symbolic_bytes, Environment, ExecutionState, Frame, FrameKind},
        },
        world::{Address, WorldState},
    };

    fn environment(address: u64) -> Environment {
        Environment {
            address:   Address::from(address),
            caller:    Address::from(1),
            origin:    Address::from(1),
            value:     SymbolicValue::word(0u8),
            calldata:  Vec::new(),
            is_static: false,
        }
    }

    fn running_state() -> ExecutionState {
        let world = WorldState::new();
        let mut state = ExecutionState::genesis(world.clone());
        state.outcome = None;
        state.gas_limit = 1_000_000;
        state.frame = Frame::new(
            Arc::new(Program::empty()),
            environment(10),
            FrameKind::Transaction,
            world,
            0,
            1024,
        );
        state
    }

    fn enter_call(state: &mut ExecutionState) {
        let callee = Frame::new(
            Arc::new(Program::empty()),
            environment(20),
            FrameKind::Call {
                return_offset: 0,
                return_size:   2,
            },
            state.world.clone(),
            state.logs.len(),
            1024,
        );
        let caller = std::mem::replace(&mut state.frame, callee);
        state.call_stack.push(caller);
    }

    #[test]
    fn genesis_is_a_ready_state() {
        let state = ExecutionState::genesis(WorldState::new());
        assert!(state.is_terminal());
        assert!(state.outcome().is_some_and(Outcome::is_success));
    }

    #[test]
    fn returning_copies_data_and_pushes_success() -> anyhow::Result<()> {
        let mut state = running_state();
        enter_call(&mut state);
        state.world = state.world.write_storage(
            Address::from(20),
            SymbolicValue::word(1u8),
            SymbolicValue::word(5u8),
        );

        state.halt(Outcome::Return {
            data: symbolic_bytes(&[0xaa, 0xbb, 0xcc]),
        })?;

        assert!(!state.is_terminal());
        assert_eq!(state.depth(), 0);
        assert_eq!(state.frame.stack.read(0)?.as_concrete(), Some(U256::ONE));
        assert_eq!(state.frame.memory.read_byte(1).as_concrete(), Some(U256::from(0xbbu8)));
        assert_eq!(state.frame.memory.read_byte(2).as_concrete(), Some(U256::ZERO));
        assert_eq!(state.return_data().len(), 3);
        assert_eq!(
            state.world.read_storage(Address::from(20), &SymbolicValue::word(1u8))?.as_concrete(),
            Some(U256::from(5u8))
        );

        Ok(())
    }

    #[test]
    fn reverting_rolls_back_the_callee() -> anyhow::Result<()> {
        let mut state = running_state();
        enter_call(&mut state);
        state.world = state.world.write_storage(
            Address::from(20),
            SymbolicValue::word(1u8),
            SymbolicValue::word(5u8),
        );

        state.halt(Outcome::Revert { data: Vec::new() })?;

        assert_eq!(state.frame.stack.read(0)?.as_concrete(), Some(U256::ZERO));
        assert_eq!(
            state.world.read_storage(Address::from(20), &SymbolicValue::word(1u8))?.as_concrete(),
            Some(U256::ZERO)
        );

        Ok(())
    }

    #[test]
    fn terminating_ends_the_whole_path() {
        let mut state = running_state();
        enter_call(&mut state);
        state.terminate(ExceptionKind::SymbolicJumpTarget);

        assert!(state.is_terminal());
        assert_eq!(state.depth(), 0);
        assert_eq!(
            state.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::SymbolicJumpTarget,
            })
        );
    }

    #[test]
    fn symbolic_memory_offsets_are_rejected() {
        let mut state = running_state();
        let offset = SymbolicValue::fresh_symbol(256, "offset");
        assert_eq!(
            state.memory_range(&offset, &SymbolicValue::word(32u8)),
            Err(ExceptionKind::SymbolicOffset)
        );
        assert_eq!(state.memory_range(&offset, &SymbolicValue::word(0u8)), Ok((0, 0)));
    }
}
