//! Opcodes that perform comparison and bitwise operations on the EVM.
//!
//! Comparisons produce single-bit predicates internally, which are widened to
//! a word of value `0` or `1` before being pushed.

use crate::{
    constant::WORD_SIZE_BITS,
    expr::{Operator, SymbolicValue},
    vm::{state::ExecutionState, Effect, OpResult},
};

/// The comparison opcodes `LT`, `GT`, `SLT`, `SGT` and `EQ`, each applying the
/// predicate `operator`.
///
/// # Semantics
///
/// | Stack Index | Input | Output                              |
/// | :---------: | :---: | :---------------------------------: |
/// | 1           | `a`   | `if operator(a, b) then 1 else 0`   |
/// | 2           | `b`   |                                     |
pub fn compare(state: &mut ExecutionState, operator: Operator) -> OpResult {
    let [a, b] = state.frame.stack.pop_n()?;
    let predicate = SymbolicValue::apply(operator, vec![a, b])?;
    state.frame.stack.push(predicate.zero_extend(WORD_SIZE_BITS)?)?;
    Ok(Effect::Next)
}

/// The `ISZERO` opcode checks if its operand is zero.
///
/// # Semantics
///
/// | Stack Index | Input | Output                    |
/// | :---------: | :---: | :-----------------------: |
/// | 1           | `a`   | `if a == 0 then 1 else 0` |
pub fn is_zero(state: &mut ExecutionState) -> OpResult {
    let a = state.frame.stack.pop()?;
    let predicate = SymbolicValue::apply(Operator::Eq, vec![a, SymbolicValue::word(0u8)])?;
    state.frame.stack.push(predicate.zero_extend(WORD_SIZE_BITS)?)?;
    Ok(Effect::Next)
}

/// The bitwise opcodes `AND`, `OR` and `XOR`.
///
/// # Semantics
///
/// | Stack Index | Input | Output           |
/// | :---------: | :---: | :--------------: |
/// | 1           | `a`   | `operator(a, b)` |
/// | 2           | `b`   |                  |
pub fn bitwise(state: &mut ExecutionState, operator: Operator) -> OpResult {
    let [a, b] = state.frame.stack.pop_n()?;
    state.frame.stack.push(SymbolicValue::apply(operator, vec![a, b])?)?;
    Ok(Effect::Next)
}

/// The `NOT` opcode performs bitwise negation.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 1           | `a`   | `~a`   |
pub fn not(state: &mut ExecutionState) -> OpResult {
    let a = state.frame.stack.pop()?;
    state.frame.stack.push(SymbolicValue::apply(Operator::Not, vec![a])?)?;
    Ok(Effect::Next)
}

/// The `BYTE` opcode gets a single byte from a word.
///
/// # Semantics
///
/// | Stack Index | Input | Output                                       |
/// | :---------: | :---: | :------------------------------------------: |
/// | 1           | `i`   | the `i`th byte of `x`, counting from the     |
/// | 2           | `x`   | most significant, or `0` if `i >= 32`        |
pub fn byte(state: &mut ExecutionState) -> OpResult {
    let [index, value] = state.frame.stack.pop_n()?;
    state
        .frame
        .stack
        .push(SymbolicValue::apply(Operator::Byte, vec![value, index])?)?;
    Ok(Effect::Next)
}

/// The shift opcodes `SHL`, `SHR` and `SAR`.
///
/// # Semantics
///
/// | Stack Index | Input   | Output                  |
/// | :---------: | :-----: | :---------------------: |
/// | 1           | `shift` | `operator(value, shift)`|
/// | 2           | `value` |                         |
pub fn shift(state: &mut ExecutionState, operator: Operator) -> OpResult {
    let [shift, value] = state.frame.stack.pop_n()?;
    state
        .frame
        .stack
        .push(SymbolicValue::apply(operator, vec![value, shift])?)?;
    Ok(Effect::Next)
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        bytecode,
        opcode::Opcode,
        vm::{
            test::{return_top, returned_word, run_linear, state_for},
            Interpreter,
        },
    };

    fn evaluate(mut code: Vec<u8>) -> Option<U256> {
        code.extend(return_top());
        let done = run_linear(&Interpreter::default(), state_for(code, vec![]));
        returned_word(&done)
    }

    #[test]
    fn comparisons_push_words() {
        let code = bytecode![Opcode::push_value(2u8), Opcode::push_value(1u8), Opcode::Lt];
        assert_eq!(evaluate(code), Some(U256::ONE));

        let code = bytecode![Opcode::push_value(2u8), Opcode::push_value(1u8), Opcode::Gt];
        assert_eq!(evaluate(code), Some(U256::ZERO));

        // -1 < 1 when signed.
        let code = bytecode![
            Opcode::push_value(1u8),
            Opcode::push_value(U256::MAX),
            Opcode::SLt,
        ];
        assert_eq!(evaluate(code), Some(U256::ONE));

        let code = bytecode![Opcode::push_value(0u8), Opcode::IsZero];
        assert_eq!(evaluate(code), Some(U256::ONE));
    }

    #[test]
    fn bytes_count_from_the_most_significant() {
        let code = bytecode![
            Opcode::push_value(0xabcdu16),
            Opcode::push_value(30u8),
            Opcode::Byte,
        ];
        assert_eq!(evaluate(code), Some(U256::from(0xabu8)));

        let code = bytecode![
            Opcode::push_value(0xabcdu16),
            Opcode::push_value(32u8),
            Opcode::Byte,
        ];
        assert_eq!(evaluate(code), Some(U256::ZERO));
    }

    #[test]
    fn shifts_take_the_shift_first() {
        let code = bytecode![Opcode::push_value(1u8), Opcode::push_value(4u8), Opcode::Shl];
        assert_eq!(evaluate(code), Some(U256::from(16u8)));

        let code = bytecode![
            Opcode::push_value(U256::MAX),
            Opcode::push_value(255u8),
            Opcode::Sar,
        ];
        assert_eq!(evaluate(code), Some(U256::MAX));

        let code = bytecode![Opcode::push_value(0xf0u8), Opcode::Not];
        assert_eq!(evaluate(code), Some(!U256::from(0xf0u8)));
    }
}
