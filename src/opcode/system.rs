//! Opcodes that create accounts, call into other accounts, or destroy the
//! current one.
//!
//! # Frames
//!
//! Calls and creations that run code push a new frame and return
//! [`Effect::Entered`]. The caller's program counter is moved past the calling
//! instruction before it is suspended, so that execution resumes there when
//! the callee halts and [`ExecutionState::halt`] pushes the result.
//!
//! # Value Transfers
//!
//! Moving value requires the sender to hold at least that much. When this is
//! decided concretely the call either proceeds or fails, pushing `0`. When it
//! is symbolic the state forks: the copy in which the balance suffices enters
//! the callee, and the original fails.

use std::sync::Arc;

use crate::{
    disassembly::Program,
    expr::SymbolicValue,
    opcode::memory::concrete_address,
    vm::{
        outcome::{ExceptionKind, Outcome},
        state::{concrete_bytes, Environment, ExecutionState, Frame, FrameKind},
        Config,
        Effect,
        Interrupt,
        OpResult,
    },
    world::{Address, WorldState},
};

/// The four message-call opcodes, which differ in whose storage the callee
/// acts on and what it may do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallKind {
    /// `CALL` runs the target's code on the target's account.
    Call,

    /// `CALLCODE` runs the target's code on the current account.
    CallCode,

    /// `DELEGATECALL` runs the target's code on the current account, keeping
    /// the current caller and value.
    DelegateCall,

    /// `STATICCALL` runs the target's code on the target's account, forbidding
    /// any state change.
    StaticCall,
}

impl CallKind {
    /// Checks if the call takes a `value` operand.
    #[must_use]
    pub fn takes_value(self) -> bool {
        matches!(self, Self::Call | Self::CallCode)
    }
}

/// The message-call opcodes `CALL`, `CALLCODE`, `DELEGATECALL` and
/// `STATICCALL`.
///
/// # Semantics
///
/// | Stack Index | Input        | Output    |
/// | :---------: | :----------: | :-------: |
/// | 1           | `gas`        | `success` |
/// | 2           | `address`    |           |
/// | 3           | `value`      |           |
/// | 4           | `argsOffset` |           |
/// | 5           | `argsSize`   |           |
/// | 6           | `retOffset`  |           |
/// | 7           | `retSize`    |           |
///
/// `DELEGATECALL` and `STATICCALL` take no `value`. The `gas` operand is
/// ignored, as gas is accounted per transaction. Calling an account with no
/// code succeeds immediately after the transfer.
///
/// # Errors
///
/// Ends the path if the address is symbolic or the call depth is exceeded.
pub fn call(state: &mut ExecutionState, config: &Config, kind: CallKind) -> OpResult {
    let _gas = state.frame.stack.pop()?;
    let target = state.frame.stack.pop()?;
    let value = if kind.takes_value() {
        state.frame.stack.pop()?
    } else {
        SymbolicValue::word(0u8)
    };
    let [args_offset, args_size, ret_offset, ret_size] = state.frame.stack.pop_n()?;

    let target = concrete_address(&target)?;
    if kind == CallKind::Call
        && state.frame.env.is_static
        && value.as_concrete().map_or(true, |v| v != 0)
    {
        return Err(ExceptionKind::StaticStateChange.into());
    }

    let (args_offset, args_size) = state.memory_range(&args_offset, &args_size)?;
    let (return_offset, return_size) = state.memory_range(&ret_offset, &ret_size)?;
    check_depth(state, config)?;

    let current = &state.frame.env;
    let env = match kind {
        CallKind::Call => Environment {
            address: target,
            caller: current.address,
            value,
            ..current.clone()
        },
        CallKind::CallCode => Environment {
            caller: current.address,
            value,
            ..current.clone()
        },
        CallKind::DelegateCall => current.clone(),
        CallKind::StaticCall => Environment {
            address: target,
            caller: current.address,
            value,
            is_static: true,
            ..current.clone()
        },
    };
    let env = Environment {
        calldata: state.frame.memory.read(args_offset, args_size),
        ..env
    };

    let checkpoint = state.world.clone();
    let program = state.world.code(target);
    let frame_kind = FrameKind::Call {
        return_offset,
        return_size,
    };
    if !kind.takes_value() {
        let world = state.world.clone();
        return enter_or_skip(state, config, program, env, frame_kind, checkpoint, world);
    }

    let transfer = state.world.transfer(state.frame.env.address, env.address, &env.value)?;
    match transfer.obligation.as_bool() {
        Some(false) => fail(state),
        Some(true) => {
            enter_or_skip(state, config, program, env, frame_kind, checkpoint, transfer.world)
        }
        None => {
            let mut taken = state.clone();
            let effect = enter_or_skip(
                &mut taken,
                config,
                program,
                env,
                frame_kind,
                checkpoint,
                transfer.world,
            )?;
            if let Effect::Next = effect {
                taken.frame.pc += 1;
            }
            fail(state)?;
            Ok(Effect::Branch {
                predicate: transfer.obligation,
                taken:     Box::new(taken),
            })
        }
    }
}

/// The contract creation opcodes `CREATE` and `CREATE2`.
///
/// # Semantics
///
/// | Stack Index | Input    | Output    |
/// | :---------: | :------: | :-------: |
/// | 1           | `value`  | `address` |
/// | 2           | `offset` |           |
/// | 3           | `size`   |           |
/// | 4           | `salt`   |           |
///
/// Only `CREATE2` takes a `salt`. The init code at `memory[offset..offset +
/// size]` runs in a new frame, and the code it returns is deployed to the new
/// address. The creator's nonce is incremented whether or not the creation
/// succeeds. Creating over an existing contract fails, pushing `0`.
///
/// # Errors
///
/// Ends the path if the init code or salt is symbolic, or the call depth is
/// exceeded.
pub fn create(state: &mut ExecutionState, config: &Config, is_create2: bool) -> OpResult {
    let [value, offset, size] = state.frame.stack.pop_n()?;
    let salt = if is_create2 {
        Some(state.frame.stack.pop()?)
    } else {
        None
    };

    let (offset, size) = state.memory_range(&offset, &size)?;
    let init_code = concrete_bytes(&state.frame.memory.read(offset, size))
        .ok_or(ExceptionKind::SymbolicCode)?;
    check_depth(state, config)?;

    let sender = state.frame.env.address;
    let address = match salt {
        Some(salt) => {
            let salt = salt.as_concrete().ok_or(ExceptionKind::SymbolicAddress)?;
            sender.create2(salt.to_be_bytes(), &init_code)
        }
        None => sender.create(state.world.nonce(sender)),
    };
    state.world = state.world.increment_nonce(sender);

    let collides = state
        .world
        .account(address)
        .is_some_and(|a| a.nonce() > 0 || a.is_contract());
    if collides {
        tracing::debug!(%address, "Creation collided with an existing contract");
        return fail(state);
    }

    let checkpoint = state.world.clone();
    let transfer = state.world.transfer(sender, address, &value)?;
    let program = Program::new(init_code).map_err(|_| ExceptionKind::MemoryLimit)?;
    let env = Environment {
        address,
        caller: sender,
        origin: state.frame.env.origin,
        value,
        calldata: Vec::new(),
        is_static: false,
    };
    let frame_kind = FrameKind::Create { address };

    match transfer.obligation.as_bool() {
        Some(false) => fail(state),
        Some(true) => {
            let world = transfer.world.increment_nonce(address);
            enter(state, config, Arc::new(program), env, frame_kind, checkpoint, world)
        }
        None => {
            let mut taken = state.clone();
            let world = transfer.world.increment_nonce(address);
            enter(
                &mut taken,
                config,
                Arc::new(program),
                env,
                frame_kind,
                checkpoint,
                world,
            )?;
            fail(state)?;
            Ok(Effect::Branch {
                predicate: transfer.obligation,
                taken:     Box::new(taken),
            })
        }
    }
}

/// The `SELFDESTRUCT` opcode destroys the current account, sending its
/// balance to a beneficiary, and halts the frame successfully.
///
/// # Semantics
///
/// | Stack Index | Input         | Output |
/// | :---------: | :-----------: | :----: |
/// | 1           | `beneficiary` |        |
pub fn self_destruct(state: &mut ExecutionState) -> OpResult {
    let beneficiary = state.frame.stack.pop()?;
    let beneficiary = concrete_address(&beneficiary)?;
    state.world = state.world.destroy(state.frame.env.address, beneficiary)?;
    Ok(Effect::Halt(Outcome::stop()))
}

/// Ends the path if another frame would exceed the maximum call depth.
fn check_depth(state: &ExecutionState, config: &Config) -> Result<(), ExceptionKind> {
    if state.call_stack.len() + 1 >= config.max_call_depth {
        return Err(ExceptionKind::CallDepthExceeded);
    }
    Ok(())
}

/// Pushes the result of a call or creation that failed before running any
/// code.
fn fail(state: &mut ExecutionState) -> OpResult {
    state.return_data.clear();
    state.frame.stack.push(SymbolicValue::word(0u8))?;
    Ok(Effect::Next)
}

/// Enters a message call, unless the callee has no code, in which case the
/// call succeeds at once in `world`.
fn enter_or_skip(
    state: &mut ExecutionState,
    config: &Config,
    program: Arc<Program>,
    env: Environment,
    kind: FrameKind,
    checkpoint: WorldState,
    world: WorldState,
) -> OpResult {
    if program.is_empty() {
        state.world = world;
        state.return_data.clear();
        state.frame.stack.push(SymbolicValue::word(1u8))?;
        return Ok(Effect::Next);
    }
    enter(state, config, program, env, kind, checkpoint, world)
}

/// Suspends the current frame and starts running `program` in a new frame
/// over `world`, which is rolled back to `checkpoint` if the frame fails.
fn enter(
    state: &mut ExecutionState,
    config: &Config,
    program: Arc<Program>,
    env: Environment,
    kind: FrameKind,
    checkpoint: WorldState,
    world: WorldState,
) -> Result<Effect, Interrupt> {
    let callee = Frame::new(
        program,
        env,
        kind,
        checkpoint,
        state.logs.len(),
        config.max_memory_bytes,
    );
    let mut caller = std::mem::replace(&mut state.frame, callee);
    caller.pc += 1;
    state.call_stack.push(caller);
    state.world = world;
    state.return_data.clear();
    tracing::trace!(depth = state.depth(), address = %state.frame.env.address, "Entered frame");
    Ok(Effect::Entered)
}

/// Gets the address that a state would create a contract at with `CREATE`.
#[must_use]
pub fn next_create_address(world: &WorldState, sender: Address) -> Address {
    sender.create(world.nonce(sender))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ethnum::U256;

    use crate::{
        bytecode,
        disassembly::Program,
        expr::SymbolicValue,
        opcode::{system::next_create_address, Opcode},
        vm::{
            outcome::{ExceptionKind, Outcome},
            state::ExecutionState,
            test::{return_top, returned_word, run_linear, state_for, CONTRACT},
            Config,
            Interpreter,
            Transition,
        },
        world::Address,
    };

    const CALLEE: u64 = 0xca11;

    /// Code that stores 1 at key 0 and returns the word 42.
    fn callee_code() -> Vec<u8> {
        let mut code = bytecode![
            Opcode::push_value(1u8),
            Opcode::push_value(0u8),
            Opcode::SStore,
            Opcode::push_value(42u8),
        ];
        code.extend(return_top());
        code
    }

    /// Code that calls [`CALLEE`] with `value`, copying 32 bytes of return
    /// data to memory offset 0, and then runs `after`.
    fn caller_code(call: Opcode, value: u64, after: &[Opcode]) -> Vec<u8> {
        let mut ops = vec![
            Opcode::push_value(32u8),
            Opcode::push_value(0u8),
            Opcode::push_value(0u8),
            Opcode::push_value(0u8),
        ];
        if matches!(call, Opcode::Call | Opcode::CallCode) {
            ops.push(Opcode::push_value(value));
        }
        ops.extend([
            Opcode::push_value(CALLEE),
            Opcode::push_value(0u8),
            call,
        ]);
        ops.extend_from_slice(after);
        ops.iter().flat_map(Opcode::encode).collect()
    }

    fn with_callee(state: ExecutionState, code: Vec<u8>) -> ExecutionState {
        let mut state = state;
        let program = Arc::new(Program::new(code).unwrap());
        state.world = state.world.deploy_code(Address::from(CALLEE), program);
        state
    }

    #[test]
    fn calls_return_data_to_the_caller() {
        let after = [Opcode::Pop, Opcode::push_value(0u8), Opcode::MLoad];
        let mut code = caller_code(Opcode::Call, 0, &after);
        code.extend(return_top());
        let state = with_callee(state_for(code, vec![]), callee_code());
        let done = run_linear(&Interpreter::default(), state);

        assert_eq!(returned_word(&done), Some(U256::from(42u8)));
        assert_eq!(done.return_data().len(), 32);

        let written = done
            .world()
            .read_storage(Address::from(CALLEE), &SymbolicValue::word(0u8))
            .unwrap();
        assert_eq!(written.as_concrete(), Some(U256::ONE));
    }

    #[test]
    fn delegate_calls_act_on_the_caller() {
        let mut code = caller_code(Opcode::DelegateCall, 0, &[]);
        code.extend(return_top());
        let state = with_callee(state_for(code, vec![]), callee_code());
        let done = run_linear(&Interpreter::default(), state);

        assert_eq!(returned_word(&done), Some(U256::ONE));
        let key = SymbolicValue::word(0u8);
        let own = done.world().read_storage(Address::from(CONTRACT), &key).unwrap();
        let theirs = done.world().read_storage(Address::from(CALLEE), &key).unwrap();
        assert_eq!(own.as_concrete(), Some(U256::ONE));
        assert_eq!(theirs.as_concrete(), Some(U256::ZERO));
    }

    #[test]
    fn static_calls_cannot_write() {
        let mut code = caller_code(Opcode::StaticCall, 0, &[]);
        code.extend(return_top());
        let state = with_callee(state_for(code, vec![]), callee_code());
        let done = run_linear(&Interpreter::default(), state);

        // The callee's `SSTORE` fails the inner frame only.
        assert_eq!(returned_word(&done), Some(U256::ZERO));
        let key = SymbolicValue::word(0u8);
        let theirs = done.world().read_storage(Address::from(CALLEE), &key).unwrap();
        assert_eq!(theirs.as_concrete(), Some(U256::ZERO));
    }

    #[test]
    fn reverting_callees_roll_back() {
        let callee = bytecode![
            Opcode::push_value(1u8),
            Opcode::push_value(0u8),
            Opcode::SStore,
            Opcode::push_value(0u8),
            Opcode::push_value(0u8),
            Opcode::Revert,
        ];
        let mut code = caller_code(Opcode::Call, 0, &[]);
        code.extend(return_top());
        let state = with_callee(state_for(code, vec![]), callee);
        let done = run_linear(&Interpreter::default(), state);

        assert_eq!(returned_word(&done), Some(U256::ZERO));
        let key = SymbolicValue::word(0u8);
        let theirs = done.world().read_storage(Address::from(CALLEE), &key).unwrap();
        assert_eq!(theirs.as_concrete(), Some(U256::ZERO));
    }

    #[test]
    fn unaffordable_transfers_fail_the_call() {
        let mut code = caller_code(Opcode::Call, 5, &[]);
        code.extend(return_top());
        let state = with_callee(state_for(code, vec![]), callee_code());
        let done = run_linear(&Interpreter::default(), state);

        // The contract itself holds no balance.
        assert_eq!(returned_word(&done), Some(U256::ZERO));
    }

    #[test]
    fn calls_to_accounts_without_code_succeed() {
        let mut code = caller_code(Opcode::Call, 0, &[]);
        code.extend(return_top());
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));

        assert_eq!(returned_word(&done), Some(U256::ONE));
    }

    #[test]
    fn symbolic_balances_fork_the_transfer() -> anyhow::Result<()> {
        let mut code = caller_code(Opcode::Call, 5, &[]);
        code.extend(return_top());
        let mut state = with_callee(state_for(code, vec![]), callee_code());
        let balance = SymbolicValue::fresh_symbol(256, "balance");
        state.world = state.world.set_balance(Address::from(CONTRACT), balance);

        let interpreter = Interpreter::default();
        let forked = loop {
            match interpreter.step(state)? {
                Transition::Continue(next) => state = next,
                Transition::Fork(states) => break states,
                Transition::Halted(_) => anyhow::bail!("Halted before forking"),
            }
        };
        let [taken, failed] = *forked;

        assert_eq!(taken.depth(), 1);
        assert_eq!(failed.depth(), 0);
        assert_eq!(taken.path().len(), 1);
        assert_eq!(failed.path().len(), 1);

        Ok(())
    }

    #[test]
    fn creates_deploy_returned_code() {
        // Init code returning the single byte 0x00 as the runtime code.
        let init = bytecode![
            Opcode::push_value(1u8),
            Opcode::push_value(0u8),
            Opcode::Return,
        ];
        let mut init_word = [0u8; 32];
        init_word[..init.len()].copy_from_slice(&init);

        let mut code = bytecode![
            Opcode::push_value(U256::from_be_bytes(init_word)),
            Opcode::push_value(0u8),
            Opcode::MStore,
            Opcode::push_value(u8::try_from(init.len()).unwrap()),
            Opcode::push_value(0u8),
            Opcode::push_value(0u8),
            Opcode::Create,
        ];
        code.extend(return_top());
        let state = state_for(code, vec![]);
        let expected = next_create_address(state.world(), Address::from(CONTRACT));
        let done = run_linear(&Interpreter::default(), state);

        assert_eq!(returned_word(&done), Some(expected.value()));
        assert_eq!(done.world().code(expected).bytes(), &[0x00]);
        assert_eq!(done.world().nonce(expected), 1);
        assert_eq!(done.world().nonce(Address::from(CONTRACT)), 1);
    }

    #[test]
    fn symbolic_init_code_ends_the_path() {
        let calldata = vec![SymbolicValue::fresh_symbol(8, "code")];
        let code = bytecode![
            Opcode::push_value(1u8),
            Opcode::push_value(0u8),
            Opcode::push_value(0u8),
            Opcode::CallDataCopy,
            Opcode::push_value(1u8),
            Opcode::push_value(0u8),
            Opcode::push_value(0u8),
            Opcode::Create,
        ];
        let done = run_linear(&Interpreter::default(), state_for(code, calldata));

        assert_eq!(
            done.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::SymbolicCode,
            })
        );
    }

    #[test]
    fn call_depth_is_bounded() {
        let mut code = caller_code(Opcode::Call, 0, &[]);
        code.extend(return_top());
        let state = with_callee(state_for(code, vec![]), callee_code());
        let interpreter = Interpreter::new(Config::default().with_max_call_depth(1));
        let done = run_linear(&interpreter, state);

        assert_eq!(
            done.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::CallDepthExceeded,
            })
        );
    }

    #[test]
    fn self_destruct_moves_the_balance() {
        let code = bytecode![Opcode::push_value(CALLEE), Opcode::SelfDestruct];
        let mut state = state_for(code, vec![]);
        state.world = state
            .world
            .set_balance(Address::from(CONTRACT), SymbolicValue::word(9u8));
        let done = run_linear(&Interpreter::default(), state);

        assert_eq!(done.outcome(), Some(&Outcome::stop()));
        assert!(!done.world().contains(Address::from(CONTRACT)));
        assert_eq!(
            done.world().balance(Address::from(CALLEE)).as_concrete(),
            Some(U256::from(9u8))
        );
    }
}
