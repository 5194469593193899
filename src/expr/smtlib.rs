//! This module contains the serialization of symbolic values into
//! [SMT-LIB 2](https://smtlib.cs.uiowa.edu/) queries over fixed-size bit
//! vectors.
//!
//! # Encoding
//!
//! Every value maps to a bit-vector term of its own width, including the
//! single-bit booleans, which are asserted by comparing them against `#b1`.
//! Operators the theory of bit vectors has no direct counterpart for are
//! encoded as follows:
//!
//! - Division and remainder by zero are guarded with an `ite`, as the EVM
//!   defines them to be zero.
//! - `ADDMOD` and `MULMOD` are computed at double width to avoid overflow.
//! - Exponentiation by a concrete exponent is expanded by squaring, while a
//!   symbolic exponent becomes an uninterpreted function.
//! - Keccak-256 becomes one uninterpreted function per input length.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bimap::BiMap;
use itertools::Itertools;

use crate::{
    constant::BYTE_SIZE_BITS,
    expr::{Data, Operator, Symbol, SymbolicValue, Width},
};

/// A complete SMT-LIB 2 script checking the satisfiability of a set of
/// constraints.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    /// The text of the script.
    pub script: String,

    /// The names under which the symbols were declared.
    pub names: BiMap<String, Symbol>,
}

/// Encodes the conjunction of `constraints` into a script that checks its
/// satisfiability, and requests a model if `want_model` is set.
#[must_use]
pub fn encode(constraints: &[SymbolicValue], want_model: bool) -> Query {
    let mut encoder = Encoder::default();
    let assertions: Vec<String> = constraints
        .iter()
        .map(|c| format!("(assert (= {} #b1))", encoder.term(c)))
        .collect();

    let mut script = String::from("(set-option :produce-models true)\n(set-logic QF_UFBV)\n");
    for (name, symbol) in encoder.names.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        script.push_str(&format!(
            "(declare-fun {name} () (_ BitVec {}))\n",
            symbol.width()
        ));
    }
    for declaration in encoder.functions.values() {
        script.push_str(declaration);
        script.push('\n');
    }
    for assertion in assertions {
        script.push_str(&assertion);
        script.push('\n');
    }
    script.push_str("(check-sat)\n");
    if want_model {
        script.push_str("(get-model)\n");
    }
    script.push_str("(exit)\n");

    Query {
        script,
        names: encoder.names,
    }
}

/// Renders `value` as a single SMT-LIB term.
#[must_use]
pub fn term(value: &SymbolicValue) -> String {
    Encoder::default().term(value)
}

/// Produces the canonical textual key for a set of constraints.
///
/// The key is independent of the order the constraints were added in and of
/// duplicates, so that path conditions which assert the same facts share a
/// cache entry.
#[must_use]
pub fn canonical_key(constraints: &[SymbolicValue]) -> String {
    let mut encoder = Encoder::default();
    let terms: BTreeSet<String> = constraints.iter().map(|c| encoder.term(c)).collect();
    terms.into_iter().join("\n")
}

/// Gets the name a symbol is declared under.
#[must_use]
pub fn symbol_name(symbol: &Symbol) -> String {
    let hint: String = symbol
        .name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{hint}_{}", symbol.id().simple())
}

/// The state needed while encoding the terms of one query.
#[derive(Debug, Default)]
struct Encoder {
    /// The declared symbols.
    names: BiMap<String, Symbol>,

    /// The declarations of uninterpreted functions, by name.
    functions: BTreeMap<String, String>,

    /// The already encoded nodes, by address.
    memo: HashMap<usize, String>,
}

impl Encoder {
    fn term(&mut self, value: &SymbolicValue) -> String {
        if let Some(text) = self.memo.get(&value.address()) {
            return text.clone();
        }
        let text = match value.data() {
            Data::Concrete(v) => constant(&v.to_string(), value.width()),
            Data::Symbol(symbol) => {
                let name = symbol_name(symbol);
                self.names.insert(name.clone(), symbol.clone());
                name
            }
            Data::Expression { operator, operands } => {
                let args: Vec<String> = operands.iter().map(|o| self.term(o)).collect();
                self.expression(*operator, operands, &args, value.width())
            }
        };
        self.memo.insert(value.address(), text.clone());
        text
    }

    #[allow(clippy::too_many_lines)] // One arm per operator reads best
    fn expression(
        &mut self,
        operator: Operator,
        operands: &[SymbolicValue],
        args: &[String],
        width: Width,
    ) -> String {
        let zero = constant("0", width);
        let operand_zero = operands.first().map(|o| constant("0", o.width())).unwrap_or_default();
        let binary = |name: &str| format!("({name} {} {})", args[0], args[1]);
        let predicate = |name: &str| format!("(ite ({name} {} {}) #b1 #b0)", args[0], args[1]);
        let guarded = |name: &str| {
            format!(
                "(ite (= {} {}) {zero} ({name} {} {}))",
                args[1], operand_zero, args[0], args[1]
            )
        };

        match operator {
            Operator::Add => binary("bvadd"),
            Operator::Sub => binary("bvsub"),
            Operator::Mul => binary("bvmul"),
            Operator::UDiv => guarded("bvudiv"),
            Operator::SDiv => guarded("bvsdiv"),
            Operator::URem => guarded("bvurem"),
            Operator::SRem => guarded("bvsrem"),
            Operator::Exp => self.exp(operands, args, width),
            Operator::AddMod | Operator::MulMod => {
                let name = if operator == Operator::AddMod { "bvadd" } else { "bvmul" };
                let extension = if operator == Operator::AddMod { 1 } else { width };
                let wide = |arg: &String| format!("((_ zero_extend {extension}) {arg})");
                format!(
                    "(ite (= {} {zero}) {zero} ((_ extract {} 0) (bvurem ({name} {} {}) {})))",
                    args[2],
                    width - 1,
                    wide(&args[0]),
                    wide(&args[1]),
                    wide(&args[2]),
                )
            }
            Operator::And => binary("bvand"),
            Operator::Or => binary("bvor"),
            Operator::Xor => binary("bvxor"),
            Operator::Not => format!("(bvnot {})", args[0]),
            Operator::Shl => binary("bvshl"),
            Operator::Shr => binary("bvlshr"),
            Operator::Sar => binary("bvashr"),
            Operator::Byte => {
                let byte_count = width / BYTE_SIZE_BITS;
                format!(
                    "(ite (bvult {index} {count}) (bvand (bvlshr {value} (bvmul (bvsub {last} \
                     {index}) {eight})) {mask}) {zero})",
                    value = args[0],
                    index = args[1],
                    count = constant(&byte_count.to_string(), width),
                    last = constant(&(byte_count - 1).to_string(), width),
                    eight = constant("8", width),
                    mask = constant("255", width),
                )
            }
            Operator::SignExtend => {
                // One case per byte the sign could be taken from, defaulting to
                // the value itself for indices past the top byte.
                let byte_count = width / BYTE_SIZE_BITS;
                (0..byte_count.saturating_sub(1)).rev().fold(args[0].clone(), |rest, index| {
                    let kept = 8 * index + 8;
                    format!(
                        "(ite (= {} {}) ((_ sign_extend {}) ((_ extract {} 0) {})) {rest})",
                        args[1],
                        constant(&index.to_string(), width),
                        width - kept,
                        kept - 1,
                        args[0],
                    )
                })
            }
            Operator::Eq => predicate("="),
            Operator::Ult => predicate("bvult"),
            Operator::Ugt => predicate("bvugt"),
            Operator::Ule => predicate("bvule"),
            Operator::Uge => predicate("bvuge"),
            Operator::Slt => predicate("bvslt"),
            Operator::Sgt => predicate("bvsgt"),
            Operator::BoolNot => format!("(bvnot {})", args[0]),
            Operator::BoolAnd => binary("bvand"),
            Operator::BoolOr => binary("bvor"),
            Operator::ZeroExtend(target) => {
                format!("((_ zero_extend {}) {})", target - operands[0].width(), args[0])
            }
            Operator::Extract { high, low } => format!("((_ extract {high} {low}) {})", args[0]),
            Operator::Concat => args
                .iter()
                .rev()
                .cloned()
                .reduce(|low, high| format!("(concat {high} {low})"))
                .unwrap_or_default(),
            Operator::Ite => format!("(ite (= {} #b1) {} {})", args[0], args[1], args[2]),
            Operator::Keccak256 => {
                let input_width = usize::from(BYTE_SIZE_BITS) * args.len();
                let name = format!("keccak256_{}", args.len());
                self.functions.entry(name.clone()).or_insert_with(|| {
                    format!("(declare-fun {name} ((_ BitVec {input_width})) (_ BitVec 256))")
                });
                let input = args
                    .iter()
                    .rev()
                    .cloned()
                    .reduce(|low, high| format!("(concat {high} {low})"))
                    .unwrap_or_default();
                format!("({name} {input})")
            }
        }
    }

    fn exp(&mut self, operands: &[SymbolicValue], args: &[String], width: Width) -> String {
        if let Some(exponent) = operands[1].as_word() {
            // Square-and-multiply, from the most significant set bit. Each square
            // is bound with `let` so the term grows linearly.
            let mut result = constant("1", width);
            let bits = 256 - exponent.value().leading_zeros();
            for index in (0..bits).rev() {
                result = format!("(let ((exp!{index} {result})) (bvmul exp!{index} exp!{index}))");
                if exponent.bit(index) {
                    result = format!("(bvmul {result} {})", args[0]);
                }
            }
            return result;
        }

        let name = format!("evm_exp_{width}");
        self.functions.entry(name.clone()).or_insert_with(|| {
            format!("(declare-fun {name} ((_ BitVec {width}) (_ BitVec {width})) (_ BitVec {width}))")
        });
        format!("({name} {} {})", args[0], args[1])
    }
}

fn constant(value: &str, width: Width) -> String {
    format!("(_ bv{value} {width})")
}

#[cfg(test)]
mod test {
    use crate::expr::{
        smtlib::{canonical_key, encode, symbol_name, term},
        Operator,
        SymbolicValue,
    };

    #[test]
    fn encodes_arithmetic_and_comparisons() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let sum = SymbolicValue::apply(Operator::Add, vec![x.clone(), SymbolicValue::word(1u8)])?;
        let name = symbol_name(x.as_symbol().unwrap());
        assert_eq!(term(&sum), format!("(bvadd {name} (_ bv1 256))"));

        let lt = SymbolicValue::apply(Operator::Ult, vec![x, SymbolicValue::word(5u8)])?;
        assert_eq!(term(&lt), format!("(ite (bvult {name} (_ bv5 256)) #b1 #b0)"));

        Ok(())
    }

    #[test]
    fn guards_division_by_zero() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let y = SymbolicValue::fresh_symbol(256, "y");
        let quotient = SymbolicValue::apply(Operator::UDiv, vec![x, y])?;
        assert!(term(&quotient).starts_with("(ite (= "));

        Ok(())
    }

    #[test]
    fn scripts_declare_symbols_and_functions() -> anyhow::Result<()> {
        let byte = SymbolicValue::fresh_symbol(8, "input byte");
        let hash = SymbolicValue::keccak(vec![byte.clone(), byte])?;
        let constraint =
            SymbolicValue::apply(Operator::Eq, vec![hash, SymbolicValue::word(0u8)])?;
        let query = encode(&[constraint], true);

        assert_eq!(query.names.len(), 1);
        let name = query.names.left_values().next().unwrap();
        assert!(name.starts_with("input_byte_"));
        assert!(query.script.contains("(declare-fun keccak256_2 ((_ BitVec 16)) (_ BitVec 256))"));
        assert!(query.script.contains("(check-sat)\n(get-model)"));

        Ok(())
    }

    #[test]
    fn canonical_keys_ignore_order_and_duplicates() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let a = SymbolicValue::apply(Operator::Ult, vec![x.clone(), SymbolicValue::word(5u8)])?;
        let b = SymbolicValue::apply(Operator::Ult, vec![SymbolicValue::word(1u8), x])?;
        assert_eq!(
            canonical_key(&[a.clone(), b.clone()]),
            canonical_key(&[b, a.clone(), a])
        );

        Ok(())
    }
}
