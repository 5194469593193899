//! This module contains the concrete evaluation of symbolic values, both for
//! constant folding and for checking candidate models against constraints.

use std::collections::HashMap;

use ethnum::U256;

use crate::{
    error::expression::Result,
    expr::{word::Word, Data, Operator, Symbol, SymbolicValue, Width},
};

/// A source of concrete values for symbols.
pub trait Assignment {
    /// Gets the value assigned to `symbol`, if any.
    fn value_of(&self, symbol: &Symbol) -> Option<U256>;
}

impl Assignment for HashMap<Symbol, U256> {
    fn value_of(&self, symbol: &Symbol) -> Option<U256> {
        self.get(symbol).copied()
    }
}

/// Folds `operator` over concrete `operands`, producing a result of `width`.
///
/// The operands must already have been validated against the operator with
/// [`Operator::result_width`].
#[must_use]
pub fn fold(operator: Operator, operands: &[Word], width: Width) -> Word {
    let arg = |i: usize| operands[i];
    match operator {
        Operator::Add => arg(0).add(arg(1)),
        Operator::Sub => arg(0).sub(arg(1)),
        Operator::Mul => arg(0).mul(arg(1)),
        Operator::UDiv => arg(0).udiv(arg(1)),
        Operator::SDiv => arg(0).sdiv(arg(1)),
        Operator::URem => arg(0).urem(arg(1)),
        Operator::SRem => arg(0).srem(arg(1)),
        Operator::Exp => arg(0).exp(arg(1)),
        Operator::AddMod => arg(0).add_mod(arg(1), arg(2)),
        Operator::MulMod => arg(0).mul_mod(arg(1), arg(2)),
        Operator::And => arg(0).and(arg(1)),
        Operator::Or => arg(0).or(arg(1)),
        Operator::Xor => arg(0).xor(arg(1)),
        Operator::Not => arg(0).not(),
        Operator::Shl => arg(0).shl(arg(1)),
        Operator::Shr => arg(0).shr(arg(1)),
        Operator::Sar => arg(0).sar(arg(1)),
        Operator::Byte => arg(0).byte(arg(1)),
        Operator::SignExtend => arg(0).sign_extend_from_byte(arg(1)),
        Operator::Eq => arg(0).eq_bit(arg(1)),
        Operator::Ult => arg(0).ult(arg(1)),
        Operator::Ugt => arg(1).ult(arg(0)),
        Operator::Ule => arg(0).ule(arg(1)),
        Operator::Uge => arg(1).ule(arg(0)),
        Operator::Slt => arg(0).slt(arg(1)),
        Operator::Sgt => arg(1).slt(arg(0)),
        Operator::BoolNot => Word::from_bool(arg(0).is_zero()),
        Operator::BoolAnd => Word::from_bool(!arg(0).is_zero() && !arg(1).is_zero()),
        Operator::BoolOr => Word::from_bool(!arg(0).is_zero() || !arg(1).is_zero()),
        Operator::ZeroExtend(_) => arg(0).zero_extend(width),
        Operator::Extract { high, low } => arg(0).extract(high, low),
        Operator::Concat => operands
            .iter()
            .copied()
            .reduce(Word::concat)
            .unwrap_or_else(|| Word::zero(width)),
        Operator::Ite => {
            if arg(0).is_zero() {
                arg(2)
            } else {
                arg(1)
            }
        }
        Operator::Keccak256 => {
            let bytes: Vec<u8> = operands.iter().flat_map(Word::to_be_bytes).collect();
            Word::keccak(&bytes)
        }
    }
}

/// Evaluates `value` under `assignment`, treating any symbol the assignment
/// does not cover as zero.
///
/// Shared subtrees are only evaluated once.
#[must_use]
pub fn evaluate(value: &SymbolicValue, assignment: &impl Assignment) -> Word {
    let mut memo = HashMap::new();
    evaluate_memo(value, assignment, &mut memo)
}

/// Evaluates `constraint` under `assignment` as a boolean.
#[must_use]
pub fn holds(constraint: &SymbolicValue, assignment: &impl Assignment) -> bool {
    !evaluate(constraint, assignment).is_zero()
}

fn evaluate_memo(
    value: &SymbolicValue,
    assignment: &impl Assignment,
    memo: &mut HashMap<usize, Word>,
) -> Word {
    if let Some(word) = memo.get(&value.address()) {
        return *word;
    }
    let result = match value.data() {
        Data::Concrete(v) => Word::new(*v, value.width()),
        Data::Symbol(symbol) => {
            Word::new(assignment.value_of(symbol).unwrap_or(U256::ZERO), value.width())
        }
        Data::Expression { operator, operands } => {
            let words: Vec<Word> =
                operands.iter().map(|o| evaluate_memo(o, assignment, memo)).collect();
            fold(*operator, &words, value.width())
        }
    };
    memo.insert(value.address(), result);
    result
}

/// Replaces every symbol covered by `assignment` in `value` with its concrete
/// value, folding and simplifying the result.
///
/// Symbols that the assignment does not cover are left in place.
///
/// # Errors
///
/// Never for values built through [`SymbolicValue::apply`], but rebuilding
/// revalidates every node.
pub fn substitute(value: &SymbolicValue, assignment: &impl Assignment) -> Result<SymbolicValue> {
    let mut memo = HashMap::new();
    substitute_memo(value, assignment, &mut memo)
}

fn substitute_memo(
    value: &SymbolicValue,
    assignment: &impl Assignment,
    memo: &mut HashMap<usize, SymbolicValue>,
) -> Result<SymbolicValue> {
    if let Some(result) = memo.get(&value.address()) {
        return Ok(result.clone());
    }
    let result = match value.data() {
        Data::Concrete(_) => value.clone(),
        Data::Symbol(symbol) => match assignment.value_of(symbol) {
            Some(v) => SymbolicValue::constant(v, value.width()),
            None => value.clone(),
        },
        Data::Expression { operator, operands } => {
            let operands = operands
                .iter()
                .map(|o| substitute_memo(o, assignment, memo))
                .collect::<Result<Vec<_>>>()?;
            SymbolicValue::apply(*operator, operands)?
        }
    };
    memo.insert(value.address(), result.clone());
    Ok(result)
}
