//! This module contains the local rewrites applied when an operator is applied
//! to operands that are not all concrete.
//!
//! Every rewrite preserves the exact semantics of the expression at its width.
//! They serve two purposes. The first is keeping expressions small, as values
//! get copied into every state forked from the one that built them. The
//! second is making tautologies visible without a solver: a branch on `x < x`
//! or a check that `x >= x` folds to a constant here, so the interpreter never
//! forks on it.
//!
//! # Normal Forms
//!
//! - Commutative operators have their operands sorted, with concrete operands
//!   last.
//! - `Ugt`, `Uge` and `Sgt` are rewritten to `Ult`, `Ule` and `Slt` with their
//!   operands swapped, and negations of unsigned comparisons are pushed into
//!   the comparison.
//! - Adjacent extracts of the same value inside a concatenation are merged, so
//!   splitting a word into bytes and joining them again yields the word.

use std::cmp::Ordering;

use ethnum::U256;

use crate::{
    error::expression::Result,
    expr::{
        word::{mask, Word},
        Operator,
        SymbolicValue,
        Width,
    },
};

/// Simplifies the application of `operator` to `operands`, at least one of
/// which is not concrete.
///
/// The operands must already have been validated, yielding the result
/// `width`.
///
/// # Errors
///
/// If a rewrite builds an invalid expression, which indicates a bug in the
/// rewrite.
pub(crate) fn simplify(
    operator: Operator,
    mut operands: Vec<SymbolicValue>,
    width: Width,
) -> Result<SymbolicValue> {
    if operator.is_commutative() {
        operands.sort_by(canonical_order);
    }

    match operator {
        Operator::Add => add(operands, width),
        Operator::Sub => sub(operands, width),
        Operator::Mul => {
            let [a, b] = pair(operands);
            if is_value(&b, 0) {
                Ok(b)
            } else if is_value(&b, 1) {
                Ok(a)
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::UDiv | Operator::SDiv => {
            let [a, b] = pair(operands);
            if is_value(&b, 0) || is_value(&a, 0) {
                Ok(zero(width))
            } else if is_value(&b, 1) {
                Ok(a)
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::URem | Operator::SRem => {
            let [a, b] = pair(operands);
            if is_value(&b, 0) || is_value(&b, 1) || is_value(&a, 0) || a == b {
                Ok(zero(width))
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::Exp => {
            let [a, b] = pair(operands);
            if is_value(&b, 0) {
                Ok(SymbolicValue::constant(1u8, width))
            } else if is_value(&b, 1) {
                Ok(a)
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::AddMod | Operator::MulMod => {
            if is_value(&operands[2], 0) {
                Ok(zero(width))
            } else {
                Ok(SymbolicValue::node(operator, operands, width))
            }
        }
        Operator::And => and(operands, width),
        Operator::Or => {
            let [a, b] = pair(operands);
            if is_value(&b, 0) || a == b {
                Ok(a)
            } else if is_ones(&b) {
                Ok(b)
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::Xor => {
            let [a, b] = pair(operands);
            if is_value(&b, 0) {
                Ok(a)
            } else if a == b {
                Ok(zero(width))
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::Not => {
            let value = &operands[0];
            if value.operator() == Some(Operator::Not) {
                Ok(value.operands()[0].clone())
            } else {
                Ok(SymbolicValue::node(operator, operands, width))
            }
        }
        Operator::Shl | Operator::Shr => shift(operator, operands, width),
        Operator::Sar => {
            if is_value(&operands[1], 0) {
                Ok(operands[0].clone())
            } else {
                Ok(SymbolicValue::node(operator, operands, width))
            }
        }
        Operator::Byte => byte(operands, width),
        Operator::SignExtend => {
            let byte_count = usize::from(width / 8);
            match operands[1].as_usize() {
                Some(index) if index + 1 >= byte_count => Ok(operands[0].clone()),
                _ => Ok(SymbolicValue::node(operator, operands, width)),
            }
        }
        Operator::Eq => eq(operands, width),
        Operator::Ugt => SymbolicValue::apply(Operator::Ult, swapped(operands)),
        Operator::Uge => SymbolicValue::apply(Operator::Ule, swapped(operands)),
        Operator::Sgt => SymbolicValue::apply(Operator::Slt, swapped(operands)),
        Operator::Ult => {
            let [a, b] = pair(operands);
            if a == b || is_value(&b, 0) || is_ones(&a) {
                Ok(SymbolicValue::bool(false))
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::Ule => {
            let [a, b] = pair(operands);
            if a == b || is_value(&a, 0) || is_ones(&b) {
                Ok(SymbolicValue::bool(true))
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::Slt => {
            let [a, b] = pair(operands);
            if a == b {
                Ok(SymbolicValue::bool(false))
            } else {
                Ok(SymbolicValue::node(operator, vec![a, b], width))
            }
        }
        Operator::BoolNot => bool_not(operands, width),
        Operator::BoolAnd | Operator::BoolOr => bool_connective(operator, operands, width),
        Operator::ZeroExtend(target) => {
            let value = &operands[0];
            if value.width() == target {
                Ok(value.clone())
            } else if let Some(Operator::ZeroExtend(_)) = value.operator() {
                SymbolicValue::apply(operator, vec![value.operands()[0].clone()])
            } else {
                Ok(SymbolicValue::node(operator, operands, width))
            }
        }
        Operator::Extract { high, low } => extract(operands, high, low, width),
        Operator::Concat => concat(operands, width),
        Operator::Ite => ite(operands, width),
        Operator::Keccak256 => Ok(SymbolicValue::node(operator, operands, width)),
    }
}

/// Orders operands of commutative operators, placing concrete operands last.
fn canonical_order(a: &SymbolicValue, b: &SymbolicValue) -> Ordering {
    (a.is_concrete(), a.shape_hash(), a.identity_hash()).cmp(&(
        b.is_concrete(),
        b.shape_hash(),
        b.identity_hash(),
    ))
}

fn pair(operands: Vec<SymbolicValue>) -> [SymbolicValue; 2] {
    let mut iter = operands.into_iter();
    let a = iter.next().unwrap_or_else(|| SymbolicValue::bool(false));
    let b = iter.next().unwrap_or_else(|| a.clone());
    [a, b]
}

fn swapped(operands: Vec<SymbolicValue>) -> Vec<SymbolicValue> {
    let [a, b] = pair(operands);
    vec![b, a]
}

fn zero(width: Width) -> SymbolicValue {
    SymbolicValue::constant(0u8, width)
}

fn is_value(value: &SymbolicValue, expected: u8) -> bool {
    value.as_concrete() == Some(U256::from(expected))
}

fn is_ones(value: &SymbolicValue) -> bool {
    value.as_word().map_or(false, |w| w == Word::ones(w.width()))
}

fn add(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let [a, b] = pair(operands);
    if is_value(&b, 0) {
        return Ok(a);
    }

    // Re-associate constants so that `(x + c1) + c2` becomes `x + (c1 + c2)`.
    if let (Some(c2), Some(Operator::Add)) = (b.as_word(), a.operator()) {
        if let Some(c1) = a.operands()[1].as_word() {
            let inner = a.operands()[0].clone();
            return SymbolicValue::apply(Operator::Add, vec![inner, c1.add(c2).into()]);
        }
    }

    Ok(SymbolicValue::node(Operator::Add, vec![a, b], width))
}

fn sub(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let [a, b] = pair(operands);
    if is_value(&b, 0) {
        return Ok(a);
    }
    if a == b {
        return Ok(zero(width));
    }
    if a.operator() == Some(Operator::Add) {
        let summands = a.operands();
        if summands[1] == b {
            return Ok(summands[0].clone());
        }
        if summands[0] == b {
            return Ok(summands[1].clone());
        }
    }

    Ok(SymbolicValue::node(Operator::Sub, vec![a, b], width))
}

fn and(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let [a, b] = pair(operands);
    if is_value(&b, 0) {
        return Ok(b);
    }
    if is_ones(&b) || a == b {
        return Ok(a);
    }

    // A mask of the low `k` bits is a truncation followed by an extension.
    if let Some(m) = b.as_concrete() {
        let next = m.wrapping_add(U256::ONE);
        if m & next == U256::ZERO {
            let bits = next.trailing_zeros();
            if let Ok(bits) = Width::try_from(bits) {
                if bits > 0 && bits < width {
                    let low = a.extract(bits - 1, 0)?;
                    return low.zero_extend(width);
                }
            }
        }
    }

    Ok(SymbolicValue::node(Operator::And, vec![a, b], width))
}

fn shift(operator: Operator, operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let [value, amount] = pair(operands);
    let Some(amount_word) = amount.as_word() else {
        return Ok(SymbolicValue::node(operator, vec![value, amount], width));
    };
    let amount = match amount_word.as_usize().and_then(|a| Width::try_from(a).ok()) {
        Some(0) => return Ok(value),
        Some(a) if a < width => a,
        _ => return Ok(zero(width)),
    };

    if operator == Operator::Shl {
        let kept = value.extract(width - 1 - amount, 0)?;
        SymbolicValue::concat(vec![kept, zero(amount)])
    } else {
        value.extract(width - 1, amount)?.zero_extend(width)
    }
}

fn byte(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let [value, index] = pair(operands);
    let Some(index_word) = index.as_word() else {
        return Ok(SymbolicValue::node(Operator::Byte, vec![value, index], width));
    };
    let byte_count = usize::from(width / 8);
    match index_word.as_usize() {
        Some(i) if i < byte_count => value.byte_at(i)?.zero_extend(width),
        _ => Ok(zero(width)),
    }
}

fn eq(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let [a, b] = pair(operands);
    if a == b {
        return Ok(SymbolicValue::bool(true));
    }

    if let Some(constant) = b.as_word() {
        if a.width() == 1 {
            return if constant.is_zero() {
                a.bool_not()
            } else {
                Ok(a)
            };
        }

        if let Some(Operator::ZeroExtend(_)) = a.operator() {
            let inner = a.operands()[0].clone();
            if constant.value() > mask(inner.width()) {
                return Ok(SymbolicValue::bool(false));
            }
            let narrowed = SymbolicValue::constant(constant.value(), inner.width());
            return SymbolicValue::apply(Operator::Eq, vec![inner, narrowed]);
        }
    }

    Ok(SymbolicValue::node(Operator::Eq, vec![a, b], width))
}

fn bool_not(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let value = &operands[0];
    match value.operator() {
        Some(Operator::BoolNot) => Ok(value.operands()[0].clone()),
        Some(Operator::Ult) => SymbolicValue::apply(Operator::Ule, swapped(value.operands().to_vec())),
        Some(Operator::Ule) => SymbolicValue::apply(Operator::Ult, swapped(value.operands().to_vec())),
        _ => Ok(SymbolicValue::node(Operator::BoolNot, operands, width)),
    }
}

fn bool_connective(
    operator: Operator,
    operands: Vec<SymbolicValue>,
    width: Width,
) -> Result<SymbolicValue> {
    let [a, b] = pair(operands);
    let absorbing = operator == Operator::BoolOr;
    if let Some(constant) = b.as_bool() {
        return Ok(if constant == absorbing {
            SymbolicValue::bool(absorbing)
        } else {
            a
        });
    }
    if a == b {
        return Ok(a);
    }
    let complementary = a.operator() == Some(Operator::BoolNot) && a.operands()[0] == b
        || b.operator() == Some(Operator::BoolNot) && b.operands()[0] == a;
    if complementary {
        return Ok(SymbolicValue::bool(absorbing));
    }

    Ok(SymbolicValue::node(operator, vec![a, b], width))
}

fn extract(
    operands: Vec<SymbolicValue>,
    high: Width,
    low: Width,
    width: Width,
) -> Result<SymbolicValue> {
    let value = &operands[0];
    if low == 0 && high + 1 == value.width() {
        return Ok(value.clone());
    }

    match value.operator() {
        Some(Operator::ZeroExtend(_)) => {
            let inner = &value.operands()[0];
            let inner_width = inner.width();
            if high < inner_width {
                inner.extract(high, low)
            } else if low >= inner_width {
                Ok(zero(width))
            } else {
                inner.extract(inner_width - 1, low)?.zero_extend(width)
            }
        }
        Some(Operator::Extract {
            low: inner_low, ..
        }) => value.operands()[0].extract(high + inner_low, low + inner_low),
        Some(Operator::Concat) => {
            // Walk the parts from the least significant, keeping the slices of
            // those that overlap the extracted range.
            let mut pieces = Vec::new();
            let mut offset: Width = 0;
            for part in value.operands().iter().rev() {
                let part_low = offset;
                let part_high = offset + part.width() - 1;
                offset += part.width();
                if part_high < low || part_low > high {
                    continue;
                }
                let slice_low = low.max(part_low) - part_low;
                let slice_high = high.min(part_high) - part_low;
                pieces.push(part.extract(slice_high, slice_low)?);
            }
            pieces.reverse();
            SymbolicValue::concat(pieces)
        }
        _ => Ok(SymbolicValue::node(
            Operator::Extract { high, low },
            operands,
            width,
        )),
    }
}

fn concat(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let mut parts: Vec<SymbolicValue> = Vec::with_capacity(operands.len());
    let flattened = operands.into_iter().flat_map(|part| {
        if part.operator() == Some(Operator::Concat) {
            part.operands().to_vec()
        } else {
            vec![part]
        }
    });

    for part in flattened {
        let merged = match parts.last() {
            Some(previous) => merge_adjacent(previous, &part)?,
            None => None,
        };
        match merged {
            Some(value) => {
                parts.pop();
                parts.push(value);
            }
            None => parts.push(part),
        }
    }

    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }

    // A zero prefix is an extension of the remaining parts.
    if is_value(&parts[0], 0) {
        let rest: Vec<SymbolicValue> = parts.into_iter().skip(1).collect();
        let rest_width = rest.iter().map(SymbolicValue::width).sum();
        let rest = if rest.len() == 1 {
            rest.into_iter().next().unwrap_or_else(|| zero(rest_width))
        } else {
            SymbolicValue::node(Operator::Concat, rest, rest_width)
        };
        return rest.zero_extend(width);
    }

    Ok(SymbolicValue::node(Operator::Concat, parts, width))
}

/// Merges two adjacent parts of a concatenation where that is possible.
fn merge_adjacent(high: &SymbolicValue, low: &SymbolicValue) -> Result<Option<SymbolicValue>> {
    if let (Some(h), Some(l)) = (high.as_word(), low.as_word()) {
        return Ok(Some(h.concat(l).into()));
    }

    let (
        Some(Operator::Extract {
            high: high_top,
            low: high_bottom,
        }),
        Some(Operator::Extract {
            high: low_top,
            low: low_bottom,
        }),
    ) = (high.operator(), low.operator())
    else {
        return Ok(None);
    };

    let source = &high.operands()[0];
    if source == &low.operands()[0] && high_bottom == low_top + 1 {
        return source.extract(high_top, low_bottom).map(Some);
    }

    Ok(None)
}

fn ite(operands: Vec<SymbolicValue>, width: Width) -> Result<SymbolicValue> {
    let mut iter = operands.into_iter();
    let (Some(condition), Some(if_true), Some(if_false)) = (iter.next(), iter.next(), iter.next())
    else {
        return Ok(zero(width));
    };

    if let Some(decided) = condition.as_bool() {
        return Ok(if decided { if_true } else { if_false });
    }
    if if_true == if_false {
        return Ok(if_true);
    }
    if condition.operator() == Some(Operator::BoolNot) {
        let inner = condition.operands()[0].clone();
        return SymbolicValue::ite(inner, if_false, if_true);
    }

    Ok(SymbolicValue::node(
        Operator::Ite,
        vec![condition, if_true, if_false],
        width,
    ))
}
