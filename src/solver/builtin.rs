//! This module contains the in-process decision procedure.
//!
//! It is deliberately incomplete. It refutes a condition when the unsigned
//! bounds that the condition places on some term cannot all be met, and it
//! proves a condition by finding an assignment under which every constraint
//! evaluates to true. Whatever falls between the two is reported as
//! [`UnknownReason::Incomplete`].

use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use ethnum::U256;
use itertools::Itertools;

use crate::{
    expr::{word::mask, Data, Operator, Symbol, SymbolicValue, Width},
    solver::{Answer, Backend, Model, UnknownReason},
};

/// The most candidate values considered for a single symbol.
const MAX_CANDIDATES_PER_SYMBOL: usize = 24;

/// The in-process decision procedure based on interval reasoning and bounded
/// model search.
#[derive(Clone, Debug)]
pub struct BuiltinBackend {
    candidate_limit: usize,
}

impl BuiltinBackend {
    /// Constructs a new backend that tries at most `candidate_limit` complete
    /// assignments before giving up.
    #[must_use]
    pub fn new(candidate_limit: usize) -> Self {
        Self { candidate_limit }
    }
}

impl Backend for BuiltinBackend {
    fn name(&self) -> &str {
        "builtin"
    }

    fn check(&self, constraints: &[SymbolicValue], _timeout: Duration) -> Answer {
        let mut conjuncts = Vec::new();
        for constraint in constraints {
            flatten(constraint, &mut conjuncts);
        }
        if conjuncts.iter().any(|c| c.as_bool() == Some(false)) {
            return Answer::Unsat;
        }
        conjuncts.retain(|c| c.as_bool() != Some(true));

        let Some(intervals) = Intervals::of(&conjuncts) else {
            return Answer::Unsat;
        };

        let mut symbols = BTreeSet::new();
        for conjunct in &conjuncts {
            symbols.extend(conjunct.symbols());
        }
        let constants = constants_in(&conjuncts);

        let candidates: Vec<Vec<U256>> = symbols
            .iter()
            .map(|s| candidates_for(s, &intervals, &constants))
            .collect();
        let symbols: Vec<Symbol> = symbols.into_iter().collect();

        let assignments: Box<dyn Iterator<Item = Vec<U256>>> = if symbols.is_empty() {
            Box::new(std::iter::once(Vec::new()))
        } else {
            Box::new(candidates.into_iter().multi_cartesian_product())
        };

        for values in assignments.take(self.candidate_limit.max(1)) {
            let mut model = Model::new();
            for (symbol, value) in symbols.iter().zip(values) {
                model.insert(symbol.clone(), value);
            }
            if model.satisfies(&conjuncts) {
                return Answer::Sat(model);
            }
        }

        Answer::Unknown(UnknownReason::Incomplete)
    }
}

/// Splits `constraint` into its conjuncts.
fn flatten(constraint: &SymbolicValue, into: &mut Vec<SymbolicValue>) {
    if constraint.operator() == Some(Operator::BoolAnd) {
        for operand in constraint.operands() {
            flatten(operand, into);
        }
    } else {
        into.push(constraint.clone());
    }
}

/// The set of unsigned values a term may still take.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Interval {
    low:      U256,
    high:     U256,
    excluded: BTreeSet<U256>,
}

impl Interval {
    fn full(width: Width) -> Self {
        Self {
            low:      U256::ZERO,
            high:     mask(width),
            excluded: BTreeSet::new(),
        }
    }

    fn raise(&mut self, low: U256) {
        self.low = self.low.max(low);
    }

    fn lower(&mut self, high: U256) {
        self.high = self.high.min(high);
    }

    /// Narrows the bounds past excluded values, returning `false` if nothing
    /// is left.
    fn normalize(&mut self) -> bool {
        while self.low <= self.high && self.excluded.contains(&self.low) {
            if self.low == U256::MAX {
                return false;
            }
            self.low += 1;
        }
        while self.low <= self.high && self.excluded.contains(&self.high) {
            if self.high == U256::ZERO {
                return false;
            }
            self.high -= 1;
        }
        self.low <= self.high
    }

    fn contains(&self, value: U256) -> bool {
        self.low <= value && value <= self.high && !self.excluded.contains(&value)
    }
}

/// The intervals implied for every term that is compared against a constant.
#[derive(Debug, Default)]
struct Intervals {
    terms: HashMap<SymbolicValue, Interval>,
}

impl Intervals {
    /// Computes the intervals implied by `conjuncts`, or [`None`] if some term
    /// is left with no possible value.
    fn of(conjuncts: &[SymbolicValue]) -> Option<Self> {
        let mut intervals = Self::default();
        for conjunct in conjuncts {
            intervals.constrain(conjunct);
        }
        for interval in intervals.terms.values_mut() {
            if !interval.normalize() {
                return None;
            }
        }
        Some(intervals)
    }

    fn entry(&mut self, term: &SymbolicValue) -> &mut Interval {
        self.terms
            .entry(term.clone())
            .or_insert_with(|| Interval::full(term.width()))
    }

    fn get(&self, term: &SymbolicValue) -> Option<&Interval> {
        self.terms.get(term)
    }

    fn constrain(&mut self, conjunct: &SymbolicValue) {
        let operands = conjunct.operands();
        match conjunct.operator() {
            Some(Operator::Ult) => match (operands[0].as_concrete(), operands[1].as_concrete()) {
                (None, Some(bound)) => {
                    if bound == U256::ZERO {
                        self.entry(&operands[0]).raise(U256::MAX);
                        self.entry(&operands[0]).lower(U256::ZERO);
                    } else {
                        self.entry(&operands[0]).lower(bound - 1);
                    }
                }
                (Some(bound), None) => {
                    if bound == mask(operands[1].width()) {
                        self.entry(&operands[1]).lower(U256::ZERO);
                        self.entry(&operands[1]).raise(U256::MAX);
                    } else {
                        self.entry(&operands[1]).raise(bound + 1);
                    }
                }
                _ => self.assert_predicate(conjunct),
            },
            Some(Operator::Ule) => match (operands[0].as_concrete(), operands[1].as_concrete()) {
                (None, Some(bound)) => self.entry(&operands[0]).lower(bound),
                (Some(bound), None) => self.entry(&operands[1]).raise(bound),
                _ => self.assert_predicate(conjunct),
            },
            Some(Operator::Eq) => match (operands[0].as_concrete(), operands[1].as_concrete()) {
                (None, Some(value)) | (Some(value), None) => {
                    let term = if operands[0].is_concrete() { &operands[1] } else { &operands[0] };
                    let interval = self.entry(term);
                    interval.raise(value);
                    interval.lower(value);
                }
                _ => self.assert_predicate(conjunct),
            },
            Some(Operator::BoolNot) => {
                let inner = &operands[0];
                let inner_operands = inner.operands();
                if inner.operator() == Some(Operator::Eq) {
                    match (inner_operands[0].as_concrete(), inner_operands[1].as_concrete()) {
                        (None, Some(value)) => {
                            self.entry(&inner_operands[0]).excluded.insert(value);
                        }
                        (Some(value), None) => {
                            self.entry(&inner_operands[1]).excluded.insert(value);
                        }
                        _ => (),
                    }
                }
                self.entry(inner).lower(U256::ZERO);
            }
            _ => self.assert_predicate(conjunct),
        }
    }

    /// Records that the single-bit `predicate` must be one.
    fn assert_predicate(&mut self, predicate: &SymbolicValue) {
        if predicate.width() == 1 && !matches!(predicate.data(), Data::Concrete(_)) {
            self.entry(predicate).raise(U256::ONE);
        }
    }
}

/// Collects the constants that occur in `conjuncts`.
fn constants_in(conjuncts: &[SymbolicValue]) -> BTreeSet<(Width, U256)> {
    fn walk(value: &SymbolicValue, into: &mut BTreeSet<(Width, U256)>) {
        match value.data() {
            Data::Concrete(v) => {
                into.insert((value.width(), *v));
            }
            Data::Symbol(_) => (),
            Data::Expression { operands, .. } => operands.iter().for_each(|o| walk(o, into)),
        }
    }

    let mut constants = BTreeSet::new();
    for conjunct in conjuncts {
        walk(conjunct, &mut constants);
    }
    constants
}

/// Builds the ordered list of values to try for `symbol`.
fn candidates_for(
    symbol: &Symbol,
    intervals: &Intervals,
    constants: &BTreeSet<(Width, U256)>,
) -> Vec<U256> {
    let width = symbol.width();
    let max = mask(width);
    let as_term = SymbolicValue::from_symbol(symbol.clone());
    let interval = intervals.get(&as_term).cloned().unwrap_or_else(|| Interval::full(width));

    let mut raw = vec![
        interval.low,
        interval.high,
        interval.low.saturating_add(U256::ONE),
        interval.high.saturating_sub(U256::ONE),
        U256::ZERO,
        U256::ONE,
    ];
    for (constant_width, constant) in constants {
        if *constant_width != width {
            continue;
        }
        raw.push(*constant);
        raw.push(constant.saturating_add(U256::ONE));
        raw.push(constant.saturating_sub(U256::ONE));
    }
    raw.push(max);

    raw.into_iter()
        .filter(|v| *v <= max && interval.contains(*v))
        .unique()
        .take(MAX_CANDIDATES_PER_SYMBOL)
        .collect()
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use ethnum::U256;

    use crate::{
        expr::{Operator, SymbolicValue},
        solver::{builtin::BuiltinBackend, Answer, Backend},
    };

    fn check(constraints: &[SymbolicValue]) -> Answer {
        BuiltinBackend::new(4096).check(constraints, Duration::from_secs(1))
    }

    #[test]
    fn finds_models_within_bounds() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let above = SymbolicValue::apply(Operator::Ugt, vec![x.clone(), SymbolicValue::word(100u8)])?;
        let below = SymbolicValue::apply(Operator::Ule, vec![x.clone(), SymbolicValue::word(200u8)])?;

        let Answer::Sat(model) = check(&[above.clone(), below.clone()]) else {
            anyhow::bail!("expected a model");
        };
        let value = model.evaluate(&x).value();
        assert!(value > U256::from(100u8) && value <= U256::from(200u8));

        Ok(())
    }

    #[test]
    fn refutes_a_predicate_and_its_negation() -> anyhow::Result<()> {
        let a = SymbolicValue::fresh_symbol(256, "a");
        let b = SymbolicValue::fresh_symbol(256, "b");
        let lt = SymbolicValue::apply(Operator::Slt, vec![a, b])?;

        assert_eq!(check(&[lt.clone(), lt.bool_not()?]), Answer::Unsat);

        Ok(())
    }

    #[test]
    fn refutes_excluded_singletons() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let is_five = SymbolicValue::apply(Operator::Eq, vec![x.clone(), SymbolicValue::word(5u8)])?;
        let not_five = is_five.bool_not()?;

        assert_eq!(check(&[is_five, not_five]), Answer::Unsat);

        Ok(())
    }

    #[test]
    fn finds_models_over_several_symbols() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let y = SymbolicValue::fresh_symbol(256, "y");
        let sum = SymbolicValue::apply(Operator::Add, vec![x.clone(), y.clone()])?;
        let target = SymbolicValue::apply(Operator::Eq, vec![sum, SymbolicValue::word(7u8)])?;
        let x_large = SymbolicValue::apply(Operator::Ugt, vec![x.clone(), SymbolicValue::word(5u8)])?;

        let Answer::Sat(model) = check(&[target.clone(), x_large.clone()]) else {
            anyhow::bail!("expected a model");
        };
        assert!(model.satisfies(&[target, x_large]));

        Ok(())
    }

    #[test]
    fn empty_conditions_are_satisfiable() {
        assert!(matches!(check(&[]), Answer::Sat(_)));
    }
}
