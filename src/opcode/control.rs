//! Opcodes that perform control(-flow) operations on the EVM.

use crate::{
    expr::SymbolicValue,
    vm::{
        outcome::{ExceptionKind, Outcome},
        state::ExecutionState,
        Effect,
        Interrupt,
        OpResult,
    },
};

/// The `STOP` opcode halts execution on the EVM, exiting the current call
/// context successfully with no data.
#[allow(clippy::unnecessary_wraps)] // Matches the other semantics for dispatch
pub fn stop() -> OpResult {
    Ok(Effect::Halt(Outcome::stop()))
}

/// The `JUMP` opcode performs an unconditional jump.
///
/// # Semantics
///
/// | Stack Index | Input     | Output |
/// | :---------: | :-------: | :----: |
/// | 1           | `counter` |        |
///
/// # Errors
///
/// Halts exceptionally if the target is not a `JUMPDEST`, and ends the path if
/// the target is symbolic.
pub fn jump(state: &mut ExecutionState) -> OpResult {
    let target = state.frame.stack.pop()?;
    let target = jump_target(state, &target)?;
    Ok(Effect::Jump(target))
}

/// The `JUMPI` opcode performs a conditional jump.
///
/// # Semantics
///
/// | Stack Index | Input       | Output |
/// | :---------: | :---------: | :----: |
/// | 1           | `counter`   |        |
/// | 2           | `condition` |        |
///
/// A concrete condition jumps or falls through. A symbolic one forks the
/// state: the copy that jumps assumes `condition != 0` and the original that
/// falls through assumes the opposite. When the target is not a `JUMPDEST`,
/// the copy that jumps halts exceptionally instead.
///
/// # Errors
///
/// Ends the path if the target is symbolic and the jump may be taken.
pub fn jump_i(state: &mut ExecutionState) -> OpResult {
    let [target, condition] = state.frame.stack.pop_n()?;
    let predicate = condition.truthy()?;

    match predicate.as_bool() {
        Some(false) => Ok(Effect::Next),
        Some(true) => Ok(Effect::Jump(jump_target(state, &target)?)),
        None => {
            let mut taken = state.clone();
            match jump_target(state, &target) {
                Ok(target) => taken.frame.pc = target,
                Err(Interrupt::Exception(kind)) if !kind.is_fatal() => {
                    match taken.halt(Outcome::Exception { kind }) {
                        Ok(()) => (),
                        Err(Interrupt::Exception(kind)) => taken.terminate(kind),
                        Err(fault) => return Err(fault),
                    }
                }
                Err(other) => return Err(other),
            }
            Ok(Effect::Branch {
                predicate,
                taken: Box::new(taken),
            })
        }
    }
}

/// The `PC` opcode gets the offset of the currently-executing instruction.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 1           |       | `pc`   |
pub fn pc(state: &mut ExecutionState) -> OpResult {
    let pc = u64::try_from(state.frame.pc).unwrap_or(u64::MAX);
    state.frame.stack.push(SymbolicValue::word(pc))?;
    Ok(Effect::Next)
}

/// The `RETURN` opcode halts the current call context, returning data from
/// memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `size`   |        |
pub fn return_(state: &mut ExecutionState) -> OpResult {
    let data = returned_data(state)?;
    Ok(Effect::Halt(Outcome::Return { data }))
}

/// The `REVERT` opcode halts the current call context, reverting its changes
/// to the world and returning data from memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `size`   |        |
pub fn revert(state: &mut ExecutionState) -> OpResult {
    let data = returned_data(state)?;
    Ok(Effect::Halt(Outcome::Revert { data }))
}

/// Any byte that does not encode an instruction, which halts exceptionally
/// when executed.
///
/// The designated `INVALID` instruction, `0xfe`, is what compilers emit for
/// failed assertions.
#[allow(clippy::unnecessary_wraps)] // Matches the other semantics for dispatch
pub fn invalid(byte: u8) -> OpResult {
    Err(ExceptionKind::InvalidOpcode(byte).into())
}

/// Reads the memory range described by the top two stack items.
fn returned_data(state: &mut ExecutionState) -> Result<Vec<SymbolicValue>, Interrupt> {
    let [offset, size] = state.frame.stack.pop_n()?;
    let (offset, size) = state.memory_range(&offset, &size)?;
    Ok(state.frame.memory.read(offset, size))
}

/// Validates `target` as a jump destination in the current program.
fn jump_target(state: &ExecutionState, target: &SymbolicValue) -> Result<usize, Interrupt> {
    let target = target.as_concrete().ok_or(ExceptionKind::SymbolicJumpTarget)?;
    match usize::try_from(target) {
        Ok(offset) if state.frame.program.is_jump_destination(offset) => Ok(offset),
        _ => Err(ExceptionKind::InvalidJump.into()),
    }
}

#[cfg(test)]
mod test {
    use crate::{
        bytecode,
        expr::SymbolicValue,
        opcode::Opcode,
        vm::{
            outcome::{ExceptionKind, Outcome},
            state::ExecutionState,
            test::{run_linear, state_for},
            Interpreter,
            Transition,
        },
    };

    fn first_fork(
        code: Vec<u8>,
        calldata: Vec<SymbolicValue>,
    ) -> anyhow::Result<[ExecutionState; 2]> {
        let interpreter = Interpreter::default();
        let mut state = state_for(code, calldata);
        loop {
            match interpreter.step(state)? {
                Transition::Continue(next) => state = next,
                Transition::Fork(states) => return Ok(*states),
                Transition::Halted(_) => anyhow::bail!("Halted before forking"),
            }
        }
    }

    #[test]
    fn concrete_conditions_do_not_fork() {
        let code = bytecode![
            Opcode::push_value(1u8),
            Opcode::push_value(6u8),
            Opcode::JumpI,
            Opcode::Invalid(0xfe),
            Opcode::JumpDest,
            Opcode::Stop,
        ];
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));
        assert_eq!(done.outcome(), Some(&Outcome::stop()));
    }

    #[test]
    fn invalid_jumps_are_exceptions() {
        let code = bytecode![Opcode::push_value(1u8), Opcode::Jump, Opcode::Stop];
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));
        assert_eq!(
            done.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::InvalidJump,
            })
        );
    }

    #[test]
    fn symbolic_targets_end_the_path() {
        let calldata = vec![SymbolicValue::fresh_symbol(8, "target")];
        let code = bytecode![Opcode::push_value(0u8), Opcode::CallDataLoad, Opcode::Jump];
        let done = run_linear(&Interpreter::default(), state_for(code, calldata));
        assert_eq!(
            done.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::SymbolicJumpTarget,
            })
        );
    }

    #[test]
    fn taken_branches_to_invalid_targets_halt() -> anyhow::Result<()> {
        let calldata = vec![SymbolicValue::fresh_symbol(8, "condition")];
        let code = bytecode![
            Opcode::push_value(0u8),
            Opcode::CallDataLoad,
            Opcode::push_value(0u8),
            Opcode::JumpI,
            Opcode::Stop,
        ];
        let [taken, fallthrough] = first_fork(code, calldata)?;

        assert_eq!(
            taken.outcome(),
            Some(&Outcome::Exception {
                kind: ExceptionKind::InvalidJump,
            })
        );
        assert!(!fallthrough.is_terminal());
        assert_eq!(taken.path().len(), 1);

        Ok(())
    }
}
