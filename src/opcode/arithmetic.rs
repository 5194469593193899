//! Opcodes that perform arithmetic operations on the EVM.
//!
//! All arithmetic is modulo `2**256`, and division or remainder by zero yields
//! zero rather than an exception.

use crate::{
    constant::EXP_GAS_PER_BYTE,
    expr::{Operator, SymbolicValue},
    vm::{state::ExecutionState, Effect, OpResult},
};

/// The two-operand arithmetic opcodes `ADD`, `MUL`, `SUB`, `DIV`, `SDIV`,
/// `MOD` and `SMOD`, each applying `operator`.
///
/// # Semantics
///
/// | Stack Index | Input | Output            |
/// | :---------: | :---: | :---------------: |
/// | 1           | `a`   | `operator(a, b)`  |
/// | 2           | `b`   |                   |
///
/// # Errors
///
/// Execution halts exceptionally if there are not enough operands on the
/// stack.
pub fn binary(state: &mut ExecutionState, operator: Operator) -> OpResult {
    let [a, b] = state.frame.stack.pop_n()?;
    let result = SymbolicValue::apply(operator, vec![a, b])?;
    state.frame.stack.push(result)?;
    Ok(Effect::Next)
}

/// The `ADDMOD` and `MULMOD` opcodes, which compute their intermediate
/// results with arbitrary precision.
///
/// # Semantics
///
/// | Stack Index | Input | Output                                 |
/// | :---------: | :---: | :------------------------------------: |
/// | 1           | `a`   | `if N == 0 then 0 else (a op b) % N`   |
/// | 2           | `b`   |                                        |
/// | 3           | `N`   |                                        |
pub fn modular(state: &mut ExecutionState, operator: Operator) -> OpResult {
    let [a, b, n] = state.frame.stack.pop_n()?;
    let result = SymbolicValue::apply(operator, vec![a, b, n])?;
    state.frame.stack.push(result)?;
    Ok(Effect::Next)
}

/// The `EXP` opcode performs exponentiation.
///
/// # Semantics
///
/// | Stack Index | Input      | Output                         |
/// | :---------: | :--------: | :----------------------------: |
/// | 1           | `base`     | `(base ** exponent) % 2**256`  |
/// | 2           | `exponent` |                                |
///
/// # Gas
///
/// Each byte of the exponent costs extra. A symbolic exponent is charged as if
/// it used all 32 bytes.
pub fn exp(state: &mut ExecutionState) -> OpResult {
    let [base, exponent] = state.frame.stack.pop_n()?;
    let exponent_bytes = exponent
        .as_concrete()
        .map_or(32, |e| u64::from((256 - e.leading_zeros()).div_ceil(8)));
    state.charge_gas(EXP_GAS_PER_BYTE * exponent_bytes)?;

    let result = SymbolicValue::apply(Operator::Exp, vec![base, exponent])?;
    state.frame.stack.push(result)?;
    Ok(Effect::Next)
}

/// The `SIGNEXTEND` opcode extends the sign of a two's complement number that
/// is `b + 1` bytes wide.
///
/// # Semantics
///
/// | Stack Index | Input | Output                   |
/// | :---------: | :---: | :----------------------: |
/// | 1           | `b`   | `sign_extend(x, b)`      |
/// | 2           | `x`   |                          |
pub fn sign_extend(state: &mut ExecutionState) -> OpResult {
    let [byte_index, value] = state.frame.stack.pop_n()?;
    let result = SymbolicValue::apply(Operator::SignExtend, vec![value, byte_index])?;
    state.frame.stack.push(result)?;
    Ok(Effect::Next)
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        bytecode,
        expr::SymbolicValue,
        opcode::Opcode,
        vm::{
            test::{return_top, returned_word, run_linear, state_for},
            Interpreter,
        },
    };

    /// Runs `code`, which leaves a single word on the stack, and gets that
    /// word.
    fn evaluate(mut code: Vec<u8>) -> Option<U256> {
        code.extend(return_top());
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));
        returned_word(&done)
    }

    #[test]
    fn division_by_zero_is_zero() {
        let code = bytecode![Opcode::push_value(0u8), Opcode::push_value(10u8), Opcode::Div];
        assert_eq!(evaluate(code), Some(U256::ZERO));

        let code = bytecode![Opcode::push_value(0u8), Opcode::push_value(10u8), Opcode::SMod];
        assert_eq!(evaluate(code), Some(U256::ZERO));
    }

    #[test]
    fn modular_arithmetic_does_not_overflow() {
        // (MAX + 2) % 3 computed without wrapping.
        let code = bytecode![
            Opcode::push_value(3u8),
            Opcode::push_value(2u8),
            Opcode::push_value(U256::MAX),
            Opcode::AddMod,
        ];
        assert_eq!(evaluate(code), Some(U256::from(2u8)));
    }

    #[test]
    fn exponentiation_wraps() {
        let code = bytecode![Opcode::push_value(2u8), Opcode::push_value(10u8), Opcode::Exp];
        assert_eq!(evaluate(code), Some(U256::from(100u8)));

        let code = bytecode![Opcode::push_value(256u16), Opcode::push_value(2u8), Opcode::Exp];
        assert_eq!(evaluate(code), Some(U256::ZERO));
    }

    #[test]
    fn sign_extension_fills_the_high_bytes() {
        let code = bytecode![
            Opcode::push_value(0xffu8),
            Opcode::push_value(0u8),
            Opcode::SignExtend,
        ];
        assert_eq!(evaluate(code), Some(U256::MAX));

        let code = bytecode![
            Opcode::push_value(0x7fu8),
            Opcode::push_value(0u8),
            Opcode::SignExtend,
        ];
        assert_eq!(evaluate(code), Some(U256::from(0x7fu8)));
    }

    #[test]
    fn symbolic_operands_build_expressions() -> anyhow::Result<()> {
        let input = SymbolicValue::fresh_symbol(8, "input");
        let code = bytecode![
            Opcode::push_value(0u8),
            Opcode::CallDataLoad,
            Opcode::push_value(1u8),
            Opcode::Add,
        ];
        let mut state = state_for(code, vec![input]);
        let interpreter = Interpreter::default();
        for _ in 0..4 {
            state = match interpreter.step(state)? {
                crate::vm::Transition::Continue(next) => next,
                other => anyhow::bail!("Unexpected transition {other:?}"),
            };
        }
        let top = state.frame().stack().read(0)?;
        assert!(!top.is_concrete());
        assert_eq!(top.symbols().len(), 1);

        Ok(())
    }
}
