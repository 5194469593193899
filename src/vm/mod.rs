//! This module contains the symbolic virtual machine: the interpreter that
//! steps an [`ExecutionState`] through one instruction at a time.
//!
//! The interpreter itself is stateless beyond its configuration. Each step
//! consumes a state and produces either the state it became, the two states
//! that a branch on a symbolic condition forked into, or the state after it
//! halted. All of the data that a path needs lives in the state, which is what
//! allows the explorer to step many states concurrently on the same
//! interpreter.

pub mod outcome;
pub mod path;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::{
    constant::{
        BLOCK_GAS_LIMIT,
        DEFAULT_BASE_FEE,
        DEFAULT_BLOCK_NUMBER,
        DEFAULT_BLOCK_TIMESTAMP,
        DEFAULT_CHAIN_ID,
        DEFAULT_GAS_PRICE,
        MAXIMUM_CALL_DEPTH,
        MAX_MEMORY_SIZE_BYTES,
    },
    error::{
        container::Locatable,
        execution::{Error, FaultReport},
        expression,
    },
    expr::{Operator, SymbolicValue},
    opcode::{arithmetic, control, environment, logic, memory, system, Opcode},
    vm::{
        outcome::{ExceptionKind, Outcome},
        state::ExecutionState,
    },
    world::Address,
};

/// What executing a single instruction asks the interpreter to do next.
#[derive(Clone, Debug)]
pub enum Effect {
    /// Continue at the next instruction.
    Next,

    /// Continue at the provided byte offset, which has been validated as a
    /// jump destination.
    Jump(usize),

    /// Fork on a symbolic single-bit `predicate`.
    ///
    /// `taken` is the state in which the predicate holds, already set up to
    /// continue. The state being stepped is the one in which it does not, and
    /// the interpreter moves it on to the next instruction. The interpreter
    /// adds the predicate and its negation to the respective path conditions.
    Branch {
        predicate: SymbolicValue,
        taken:     Box<ExecutionState>,
    },

    /// End the current frame with the provided outcome.
    Halt(Outcome),

    /// A new frame was entered, and the program counter of the caller has
    /// already been moved past the calling instruction.
    Entered,
}

/// The ways in which executing an instruction can fail to produce an
/// [`Effect`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Interrupt {
    /// The contract ended the frame abnormally.
    #[error("Exception: {0}")]
    Exception(ExceptionKind),

    /// The engine itself is broken, and the run must abort.
    #[error(transparent)]
    Fault(Error),
}

impl From<ExceptionKind> for Interrupt {
    fn from(value: ExceptionKind) -> Self {
        Self::Exception(value)
    }
}

impl From<Error> for Interrupt {
    fn from(value: Error) -> Self {
        Self::Fault(value)
    }
}

impl From<expression::Error> for Interrupt {
    fn from(value: expression::Error) -> Self {
        Self::Fault(Error::Expression(value))
    }
}

/// The result of executing the semantics of a single instruction.
pub type OpResult = Result<Effect, Interrupt>;

/// The states that a single step of the interpreter produces.
#[derive(Debug)]
pub enum Transition {
    /// The state moved on and can be stepped again.
    Continue(ExecutionState),

    /// The state forked on a symbolic branch. The first state is the one in
    /// which the branch was taken.
    ///
    /// Either of the states may already be terminal.
    Fork(Box<[ExecutionState; 2]>),

    /// The state became terminal.
    Halted(ExecutionState),
}

/// The values reported by the block information instructions.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockEnvironment {
    pub coinbase:   Address,
    pub timestamp:  u64,
    pub number:     u64,
    pub prevrandao: u64,
    pub gas_limit:  u64,
    pub chain_id:   u64,
    pub base_fee:   u64,
    pub gas_price:  u64,
}

impl Default for BlockEnvironment {
    fn default() -> Self {
        Self {
            coinbase:   Address::default(),
            timestamp:  DEFAULT_BLOCK_TIMESTAMP,
            number:     DEFAULT_BLOCK_NUMBER,
            prevrandao: 0,
            gas_limit:  BLOCK_GAS_LIMIT,
            chain_id:   DEFAULT_CHAIN_ID,
            base_fee:   DEFAULT_BASE_FEE,
            gas_price:  DEFAULT_GAS_PRICE,
        }
    }
}

/// The configuration for the interpreter.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The gas available to each transaction. States that were started with
    /// a larger limit are capped to this one when they are stepped.
    ///
    /// Defaults to [`BLOCK_GAS_LIMIT`].
    pub gas_limit: u64,

    /// The number of frames that may be active at once, counting the
    /// transaction's own frame.
    ///
    /// Defaults to [`MAXIMUM_CALL_DEPTH`].
    pub max_call_depth: usize,

    /// The size that the memory of any one frame may grow to.
    ///
    /// Defaults to [`MAX_MEMORY_SIZE_BYTES`].
    pub max_memory_bytes: usize,

    /// The block the transactions execute in.
    pub block: BlockEnvironment,
}

impl Config {
    /// Sets the `gas_limit` config parameter to `value`.
    #[must_use]
    pub fn with_gas_limit(mut self, value: u64) -> Self {
        self.gas_limit = value;
        self
    }

    /// Sets the `max_call_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_call_depth(mut self, value: usize) -> Self {
        self.max_call_depth = value.max(1);
        self
    }

    /// Sets the `max_memory_bytes` config parameter to `value`.
    #[must_use]
    pub fn with_max_memory_bytes(mut self, value: usize) -> Self {
        self.max_memory_bytes = value;
        self
    }

    /// Sets the block environment to `block`.
    #[must_use]
    pub fn with_block(mut self, block: BlockEnvironment) -> Self {
        self.block = block;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gas_limit:        BLOCK_GAS_LIMIT,
            max_call_depth:   MAXIMUM_CALL_DEPTH,
            max_memory_bytes: MAX_MEMORY_SIZE_BYTES,
            block:            BlockEnvironment::default(),
        }
    }
}

/// The symbolic interpreter for EVM bytecode.
///
/// It is designed so as to be a 1:1 match for the semantics of a real runtime
/// EVM wherever such semantics can be represented symbolically. Where they
/// cannot, such as a jump to a symbolic target, the path ends with an
/// exception naming the limitation rather than guessing.
#[derive(Clone, Debug, Default)]
pub struct Interpreter {
    config: Config,
}

impl Interpreter {
    /// Constructs a new interpreter with the provided `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Gets the interpreter's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Executes the instruction at the program counter of `state`.
    ///
    /// Every contract-level failure is recorded in the returned states. The
    /// only errors are engine faults, which come with a dump of the state
    /// being stepped.
    ///
    /// # Errors
    ///
    /// If `state` is already terminal, or the engine hits a broken invariant.
    pub fn step(&self, mut state: ExecutionState) -> Result<Transition, Box<FaultReport>> {
        let pc = state.frame.pc;
        let location = u32::try_from(pc).unwrap_or(u32::MAX);
        let fault = |error: Error, state: &ExecutionState| {
            Box::new(FaultReport::new(error.locate(location), state))
        };

        if let Some(outcome) = &state.outcome {
            let error = Error::StepOnTerminalState {
                outcome: outcome.to_string(),
            };
            return Err(fault(error, &state));
        }

        let opcode = state.frame.program.instruction(pc);
        tracing::trace!(pc, %opcode, depth = state.depth(), "Stepping");
        state.steps += 1;
        state.gas_limit = state.gas_limit.min(self.config.gas_limit);

        let transition = match self.execute(opcode, &mut state) {
            Ok(Effect::Next) => {
                state.frame.pc = next_pc(opcode, pc);
                Transition::Continue(state)
            }
            Ok(Effect::Jump(target)) => {
                state.frame.pc = target;
                Transition::Continue(state)
            }
            Ok(Effect::Entered) => Transition::Continue(state),
            Ok(Effect::Halt(outcome)) => return Self::halt(state, outcome, location),
            Ok(Effect::Branch { predicate, taken }) => {
                let mut taken = *taken;
                let negated = match predicate.bool_not() {
                    Ok(negated) => negated,
                    Err(e) => return Err(fault(e.into(), &state)),
                };
                match (taken.path.with(predicate), state.path.with(negated)) {
                    (Ok(taken_path), Ok(path)) => {
                        taken.path = taken_path;
                        state.path = path;
                    }
                    (Err(e), _) | (_, Err(e)) => return Err(fault(e.into(), &state)),
                }
                state.frame.pc = next_pc(opcode, pc);

                let parent = state.id;
                taken.reidentify(parent);
                state.reidentify(parent);
                tracing::debug!(pc, %parent, "Forked on a symbolic condition");
                Transition::Fork(Box::new([taken, state]))
            }
            Err(Interrupt::Exception(kind)) => {
                tracing::debug!(pc, %opcode, %kind, "Exception raised");
                if kind.is_fatal() {
                    state.terminate(kind);
                    Transition::Halted(state)
                } else {
                    return Self::halt(state, Outcome::Exception { kind }, location);
                }
            }
            Err(Interrupt::Fault(error)) => return Err(fault(error, &state)),
        };

        Ok(transition)
    }

    /// Ends the current frame of `state` with `outcome`.
    fn halt(
        mut state: ExecutionState,
        outcome: Outcome,
        location: u32,
    ) -> Result<Transition, Box<FaultReport>> {
        match state.halt(outcome) {
            Ok(()) => (),
            Err(Interrupt::Exception(kind)) => state.terminate(kind),
            Err(Interrupt::Fault(error)) => {
                return Err(Box::new(FaultReport::new(error.locate(location), &state)));
            }
        }

        if state.is_terminal() {
            Ok(Transition::Halted(state))
        } else {
            Ok(Transition::Continue(state))
        }
    }

    /// Runs the checks common to all instructions and then their semantics.
    fn execute(&self, opcode: Opcode, state: &mut ExecutionState) -> OpResult {
        if state.frame.stack.len() < opcode.arg_count() {
            return Err(ExceptionKind::StackUnderflow.into());
        }
        if state.frame.env.is_static && opcode.writes_state() {
            return Err(ExceptionKind::StaticStateChange.into());
        }
        state.charge_gas(opcode.min_gas_cost())?;
        self.dispatch(opcode, state)
    }

    /// Executes the semantics of `opcode` on `state`.
    fn dispatch(&self, opcode: Opcode, state: &mut ExecutionState) -> OpResult {
        let config = &self.config;
        match opcode {
            Opcode::Stop => control::stop(),
            Opcode::Add => arithmetic::binary(state, Operator::Add),
            Opcode::Mul => arithmetic::binary(state, Operator::Mul),
            Opcode::Sub => arithmetic::binary(state, Operator::Sub),
            Opcode::Div => arithmetic::binary(state, Operator::UDiv),
            Opcode::SDiv => arithmetic::binary(state, Operator::SDiv),
            Opcode::Mod => arithmetic::binary(state, Operator::URem),
            Opcode::SMod => arithmetic::binary(state, Operator::SRem),
            Opcode::AddMod => arithmetic::modular(state, Operator::AddMod),
            Opcode::MulMod => arithmetic::modular(state, Operator::MulMod),
            Opcode::Exp => arithmetic::exp(state),
            Opcode::SignExtend => arithmetic::sign_extend(state),
            Opcode::Lt => logic::compare(state, Operator::Ult),
            Opcode::Gt => logic::compare(state, Operator::Ugt),
            Opcode::SLt => logic::compare(state, Operator::Slt),
            Opcode::SGt => logic::compare(state, Operator::Sgt),
            Opcode::Eq => logic::compare(state, Operator::Eq),
            Opcode::IsZero => logic::is_zero(state),
            Opcode::And => logic::bitwise(state, Operator::And),
            Opcode::Or => logic::bitwise(state, Operator::Or),
            Opcode::Xor => logic::bitwise(state, Operator::Xor),
            Opcode::Not => logic::not(state),
            Opcode::Byte => logic::byte(state),
            Opcode::Shl => logic::shift(state, Operator::Shl),
            Opcode::Shr => logic::shift(state, Operator::Shr),
            Opcode::Sar => logic::shift(state, Operator::Sar),
            Opcode::Sha3 => environment::sha3(state),
            Opcode::Address => environment::address(state),
            Opcode::Balance => environment::balance(state),
            Opcode::Origin => environment::origin(state),
            Opcode::Caller => environment::caller(state),
            Opcode::CallValue => environment::call_value(state),
            Opcode::CallDataLoad => memory::call_data_load(state),
            Opcode::CallDataSize => memory::call_data_size(state),
            Opcode::CallDataCopy => memory::call_data_copy(state),
            Opcode::CodeSize => memory::code_size(state),
            Opcode::CodeCopy => memory::code_copy(state),
            Opcode::GasPrice => environment::block_value(state, config.block.gas_price),
            Opcode::ExtCodeSize => memory::ext_code_size(state),
            Opcode::ExtCodeCopy => memory::ext_code_copy(state),
            Opcode::ReturnDataSize => memory::return_data_size(state),
            Opcode::ReturnDataCopy => memory::return_data_copy(state),
            Opcode::ExtCodeHash => environment::ext_code_hash(state),
            Opcode::BlockHash => environment::block_hash(state, config),
            Opcode::Coinbase => environment::coinbase(state, config),
            Opcode::Timestamp => environment::block_value(state, config.block.timestamp),
            Opcode::Number => environment::block_value(state, config.block.number),
            Opcode::Prevrandao => environment::block_value(state, config.block.prevrandao),
            Opcode::GasLimit => environment::block_value(state, config.block.gas_limit),
            Opcode::ChainId => environment::block_value(state, config.block.chain_id),
            Opcode::SelfBalance => environment::self_balance(state),
            Opcode::BaseFee => environment::block_value(state, config.block.base_fee),
            Opcode::Pop => memory::pop(state),
            Opcode::MLoad => memory::m_load(state),
            Opcode::MStore => memory::m_store(state),
            Opcode::MStore8 => memory::m_store_8(state),
            Opcode::SLoad => memory::s_load(state),
            Opcode::SStore => memory::s_store(state),
            Opcode::Jump => control::jump(state),
            Opcode::JumpI => control::jump_i(state),
            Opcode::PC => control::pc(state),
            Opcode::MSize => memory::m_size(state),
            Opcode::Gas => environment::gas(state),
            Opcode::JumpDest | Opcode::Nop => Ok(Effect::Next),
            Opcode::Push { value, .. } => memory::push(state, value),
            Opcode::Dup(n) => memory::dup(state, n),
            Opcode::Swap(n) => memory::swap(state, n),
            Opcode::Log(n) => environment::log(state, n),
            Opcode::Create => system::create(state, config, false),
            Opcode::Create2 => system::create(state, config, true),
            Opcode::Call => system::call(state, config, system::CallKind::Call),
            Opcode::CallCode => system::call(state, config, system::CallKind::CallCode),
            Opcode::DelegateCall => system::call(state, config, system::CallKind::DelegateCall),
            Opcode::StaticCall => system::call(state, config, system::CallKind::StaticCall),
            Opcode::Return => control::return_(state),
            Opcode::Revert => control::revert(state),
            Opcode::Invalid(byte) => control::invalid(byte),
            Opcode::SelfDestruct => system::self_destruct(state),
        }
    }
}

/// Gets the offset of the instruction after `opcode` at `pc`, skipping any
/// push data.
fn next_pc(opcode: Opcode, pc: usize) -> usize {
    match opcode {
        Opcode::Push { size, .. } => pc + 1 + usize::from(size),
        _ => pc + 1,
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Arc;

    use ethnum::U256;

    use crate::{
        bytecode,
        disassembly::Program,
        expr::SymbolicValue,
        opcode::Opcode,
        vm::{
            outcome::{ExceptionKind, Outcome},
            path::PathCondition,
            state::{
                symbolic_bytes,
                Environment,
                ExecutionState,
                Frame,
                FrameKind,
                TransactionKind,
                TransactionRecord,
            },
            Config,
            Interpreter,
            Transition,
        },
        world::{Address, WorldState},
    };

    /// The address that test programs are deployed at.
    pub const CONTRACT: u64 = 0xc0de;

    /// The address that calls test programs.
    pub const SENDER: u64 = 0x5e4d;

    /// Builds a state about to run `code` at [`CONTRACT`] with `calldata`.
    pub fn state_for(code: Vec<u8>, calldata: Vec<SymbolicValue>) -> ExecutionState {
        let config = Config::default();
        let program = Arc::new(Program::new(code).unwrap());
        let world = WorldState::new()
            .create_account(Address::from(SENDER), SymbolicValue::word(1_000_000u64))
            .deploy_code(Address::from(CONTRACT), program.clone());
        let env = Environment {
            address: Address::from(CONTRACT),
            caller: Address::from(SENDER),
            origin: Address::from(SENDER),
            value: SymbolicValue::word(0u8),
            calldata: calldata.clone(),
            is_static: false,
        };
        let frame = Frame::new(
            program,
            env,
            FrameKind::Transaction,
            world.clone(),
            0,
            config.max_memory_bytes,
        );
        let record = TransactionRecord {
            kind: TransactionKind::Call,
            caller: Address::from(SENDER),
            target: Address::from(CONTRACT),
            calldata,
            value: SymbolicValue::word(0u8),
            function: None,
        };
        ExecutionState::genesis(world.clone()).start_transaction(
            record,
            frame,
            world,
            PathCondition::new(),
            config.gas_limit,
        )
    }

    /// Runs `state` until it halts, panicking if it forks.
    pub fn run_linear(interpreter: &Interpreter, mut state: ExecutionState) -> ExecutionState {
        for _ in 0..10_000 {
            match interpreter.step(state).unwrap() {
                Transition::Continue(next) => state = next,
                Transition::Halted(done) => return done,
                Transition::Fork(_) => panic!("Unexpected fork"),
            }
        }
        panic!("Program did not halt")
    }

    /// Gets the word returned by a terminal `state`.
    pub fn returned_word(state: &ExecutionState) -> Option<U256> {
        match state.outcome()? {
            Outcome::Return { data } if data.len() == 32 => {
                SymbolicValue::concat(data.clone()).ok()?.as_concrete()
            }
            _ => None,
        }
    }

    /// The code that returns the word on top of the stack.
    pub fn return_top() -> Vec<u8> {
        bytecode![
            Opcode::push_value(0u8),
            Opcode::MStore,
            Opcode::push_value(32u8),
            Opcode::push_value(0u8),
            Opcode::Return,
        ]
    }

    #[test]
    fn computes_concrete_arithmetic() {
        let mut code = bytecode![
            Opcode::push_value(7u8),
            Opcode::push_value(5u8),
            Opcode::Sub,
            Opcode::push_value(3u8),
            Opcode::Mul,
        ];
        code.extend(return_top());
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));

        // 3 * (5 - 7) wraps around.
        let expected = U256::MAX - U256::from(5u8);
        assert_eq!(returned_word(&done), Some(expected));
    }

    #[test]
    fn forks_on_symbolic_conditions() {
        let calldata = vec![SymbolicValue::fresh_symbol(8, "input")];
        let code = bytecode![
            Opcode::push_value(0u8),
            Opcode::CallDataLoad,
            Opcode::push_value(6u8),
            Opcode::JumpI,
            Opcode::Stop,
            Opcode::JumpDest,
            Opcode::Stop,
        ];
        let interpreter = Interpreter::default();
        let mut state = state_for(code, calldata);
        let forked = loop {
            match interpreter.step(state).unwrap() {
                Transition::Continue(next) => state = next,
                Transition::Fork(states) => break states,
                Transition::Halted(_) => panic!("Halted before forking"),
            }
        };
        let [taken, fallthrough] = *forked;

        assert_eq!(taken.pc(), 6);
        assert_eq!(fallthrough.pc(), 5);
        assert_eq!(taken.path().len(), 1);
        assert_eq!(fallthrough.path().len(), 1);
        assert_ne!(taken.id(), fallthrough.id());
        assert_eq!(taken.parent(), fallthrough.parent());
    }

    #[test]
    fn stack_underflow_is_an_exception() {
        let code = bytecode![Opcode::Add];
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));

        assert_eq!(
            done.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::StackUnderflow,
            })
        );
    }

    #[test]
    fn running_out_of_gas_ends_the_path() {
        let code = bytecode![
            Opcode::JumpDest,
            Opcode::push_value(0u8),
            Opcode::Jump,
        ];
        let interpreter = Interpreter::new(Config::default().with_gas_limit(100));
        let done = run_linear(&interpreter, state_for(code, vec![]));

        assert_eq!(
            done.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::OutOfGas,
            })
        );
        assert!(done.gas_used() > 100);
    }

    #[test]
    fn stepping_terminal_states_is_a_fault() {
        let done = run_linear(&Interpreter::default(), state_for(vec![], vec![]));
        assert!(done.is_terminal());

        let report = Interpreter::default().step(done).unwrap_err();
        assert!(matches!(
            report.error.payload,
            crate::error::execution::Error::StepOnTerminalState { .. }
        ));
    }

    #[test]
    fn reverts_carry_their_data() {
        let code = bytecode![
            Opcode::push_value(0xabu8),
            Opcode::push_value(0u8),
            Opcode::MStore8,
            Opcode::push_value(1u8),
            Opcode::push_value(0u8),
            Opcode::Revert,
        ];
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));

        assert_eq!(
            done.outcome(),
            Some(&Outcome::Revert {
                data: symbolic_bytes(&[0xab]),
            })
        );
    }
}
