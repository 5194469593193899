//! This module contains the symbolic expression engine: the representation of
//! values that are either concretely known or built as expression trees over
//! free symbols.
//!
//! # Construction
//!
//! Values are only ever built through [`SymbolicValue::constant`],
//! [`SymbolicValue::fresh_symbol`] and [`SymbolicValue::apply`]. Applying an
//! operator to operands that are all concrete folds eagerly to a concrete
//! value using the exact modular semantics of the operator at the operands'
//! width (see [`word::Word`]). Otherwise the operator and operands are passed
//! through the local rewrites in [`simplify`] before a new expression node is
//! created. Operands are never mutated.
//!
//! # Sharing
//!
//! Each node lives behind an [`Arc`] and caches a structural hash at
//! construction time. Cloning a value is cheap, equal subtrees can be shared
//! freely between forked states, and equality checks only descend into the
//! tree when the cached hashes agree.

pub mod eval;
pub mod simplify;
pub mod smtlib;
pub mod word;

use std::{
    collections::{hash_map::DefaultHasher, BTreeSet, HashSet},
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

use ethnum::U256;
use itertools::Itertools;
use uuid::Uuid;

use crate::{
    constant::{BOOL_WIDTH_BITS, BYTE_SIZE_BITS, WORD_SIZE_BITS},
    error::expression::{Error, Result},
    expr::word::Word,
};

/// The width of a value in bits.
pub type Width = u16;

/// The operators that can be applied to symbolic values.
///
/// # Operand Order
///
/// Operands are always given in the natural reading order of the operation,
/// not the order the EVM pops them off the stack. For the shifts, `BYTE` and
/// `SIGNEXTEND`, the value being operated on comes first.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Exp,
    AddMod,
    MulMod,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Sar,
    Byte,
    SignExtend,
    Eq,
    Ult,
    Ugt,
    Ule,
    Uge,
    Slt,
    Sgt,
    BoolNot,
    BoolAnd,
    BoolOr,
    ZeroExtend(Width),
    Extract { high: Width, low: Width },
    Concat,
    Ite,
    Keccak256,
}

impl Operator {
    /// Gets the short name of the operator as used in textual renderings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::UDiv => "udiv",
            Self::SDiv => "sdiv",
            Self::URem => "urem",
            Self::SRem => "srem",
            Self::Exp => "exp",
            Self::AddMod => "addmod",
            Self::MulMod => "mulmod",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Sar => "sar",
            Self::Byte => "byte",
            Self::SignExtend => "signextend",
            Self::Eq => "eq",
            Self::Ult => "ult",
            Self::Ugt => "ugt",
            Self::Ule => "ule",
            Self::Uge => "uge",
            Self::Slt => "slt",
            Self::Sgt => "sgt",
            Self::BoolNot => "bnot",
            Self::BoolAnd => "band",
            Self::BoolOr => "bor",
            Self::ZeroExtend(_) => "zext",
            Self::Extract { .. } => "extract",
            Self::Concat => "concat",
            Self::Ite => "ite",
            Self::Keccak256 => "keccak256",
        }
    }

    /// Checks if the order of the operator's operands is irrelevant to its
    /// result.
    #[must_use]
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor | Self::Eq | Self::BoolAnd | Self::BoolOr
        )
    }

    /// Checks if the operator produces a single-bit boolean.
    #[must_use]
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Ult
                | Self::Ugt
                | Self::Ule
                | Self::Uge
                | Self::Slt
                | Self::Sgt
                | Self::BoolNot
                | Self::BoolAnd
                | Self::BoolOr
        )
    }

    /// Validates `operands` against the operator's arity and width rules,
    /// returning the width of the result.
    ///
    /// # Errors
    ///
    /// If the operands have the wrong count or widths for the operator.
    pub fn result_width(self, operands: &[SymbolicValue]) -> Result<Width> {
        let arity = |expected: usize| {
            if operands.len() == expected {
                Ok(())
            } else {
                Err(Error::ArityMismatch {
                    operator: self,
                    expected,
                    found: operands.len(),
                })
            }
        };
        let uniform = |values: &[SymbolicValue]| -> Result<Width> {
            let expected = values.first().map_or(WORD_SIZE_BITS, SymbolicValue::width);
            for value in values {
                if value.width() != expected {
                    return Err(Error::WidthMismatch {
                        operator: self,
                        expected,
                        found: value.width(),
                    });
                }
            }
            Ok(expected)
        };
        let boolean = |value: &SymbolicValue| {
            if value.width() == BOOL_WIDTH_BITS {
                Ok(())
            } else {
                Err(Error::WidthMismatch {
                    operator: self,
                    expected: BOOL_WIDTH_BITS,
                    found:    value.width(),
                })
            }
        };

        match self {
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::UDiv
            | Self::SDiv
            | Self::URem
            | Self::SRem
            | Self::Exp
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Shl
            | Self::Shr
            | Self::Sar
            | Self::Byte
            | Self::SignExtend => {
                arity(2)?;
                uniform(operands)
            }
            Self::AddMod | Self::MulMod => {
                arity(3)?;
                uniform(operands)
            }
            Self::Not => {
                arity(1)?;
                Ok(operands[0].width())
            }
            Self::Eq | Self::Ult | Self::Ugt | Self::Ule | Self::Uge | Self::Slt | Self::Sgt => {
                arity(2)?;
                uniform(operands)?;
                Ok(BOOL_WIDTH_BITS)
            }
            Self::BoolNot => {
                arity(1)?;
                boolean(&operands[0])?;
                Ok(BOOL_WIDTH_BITS)
            }
            Self::BoolAnd | Self::BoolOr => {
                arity(2)?;
                operands.iter().try_for_each(boolean)?;
                Ok(BOOL_WIDTH_BITS)
            }
            Self::ZeroExtend(width) => {
                arity(1)?;
                if width > WORD_SIZE_BITS || width < operands[0].width() {
                    return Err(Error::InvalidWidth {
                        operator: self,
                        width:    operands[0].width(),
                    });
                }
                Ok(width)
            }
            Self::Extract { high, low } => {
                arity(1)?;
                if low > high || high >= operands[0].width() {
                    return Err(Error::InvalidWidth {
                        operator: self,
                        width:    operands[0].width(),
                    });
                }
                Ok(high - low + 1)
            }
            Self::Concat => {
                if operands.is_empty() {
                    return Err(Error::ArityMismatch {
                        operator: self,
                        expected: 1,
                        found:    0,
                    });
                }
                let width: u32 = operands.iter().map(|o| u32::from(o.width())).sum();
                match Width::try_from(width) {
                    Ok(width) if width <= WORD_SIZE_BITS => Ok(width),
                    _ => Err(Error::InvalidWidth {
                        operator: self,
                        width:    Width::MAX,
                    }),
                }
            }
            Self::Ite => {
                arity(3)?;
                boolean(&operands[0])?;
                uniform(&operands[1..])
            }
            Self::Keccak256 => {
                for operand in operands {
                    if operand.width() != BYTE_SIZE_BITS {
                        return Err(Error::WidthMismatch {
                            operator: self,
                            expected: BYTE_SIZE_BITS,
                            found:    operand.width(),
                        });
                    }
                }
                Ok(WORD_SIZE_BITS)
            }
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroExtend(width) => write!(f, "zext{width}"),
            Self::Extract { high, low } => write!(f, "extract[{high}:{low}]"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A free variable in symbolic expressions.
///
/// Every symbol carries a globally unique identifier. The name is only a hint
/// for humans and need not be unique.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Symbol {
    id:    Uuid,
    name:  Arc<str>,
    width: Width,
}

impl Symbol {
    /// Gets the unique identifier of the symbol.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Gets the name hint of the symbol.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the width of the symbol in bits.
    #[must_use]
    pub fn width(&self) -> Width {
        self.width
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The data carried by a node in a [`SymbolicValue`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Data {
    /// A value that is concretely known.
    Concrete(U256),

    /// A free variable.
    Symbol(Symbol),

    /// The application of an operator to operands.
    Expression {
        operator: Operator,
        operands: Vec<SymbolicValue>,
    },
}

/// A node in the expression graph.
#[derive(Debug)]
struct Node {
    data:       Data,
    width:      Width,
    hash:       u64,
    shape_hash: u64,
}

/// An immutable symbolic value of a fixed bit-width.
#[derive(Clone)]
pub struct SymbolicValue {
    node: Arc<Node>,
}

impl SymbolicValue {
    /// Constructs a concrete value of `width`, truncating `value` to fit.
    #[must_use]
    pub fn constant(value: impl Into<U256>, width: Width) -> Self {
        Self::from_word(Word::new(value, width))
    }

    /// Constructs a concrete value from the provided `word`.
    #[must_use]
    pub fn from_word(word: Word) -> Self {
        Self::from_data(Data::Concrete(word.value()), word.width())
    }

    /// Constructs a concrete EVM word.
    #[must_use]
    pub fn word(value: impl Into<U256>) -> Self {
        Self::constant(value, WORD_SIZE_BITS)
    }

    /// Constructs a concrete single-bit boolean.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::from_word(Word::from_bool(value))
    }

    /// Constructs a new free variable of `width` with a globally unique
    /// identity.
    #[must_use]
    pub fn fresh_symbol(width: Width, name_hint: impl Into<String>) -> Self {
        let name: String = name_hint.into();
        let symbol = Symbol {
            id: Uuid::new_v4(),
            name: name.into(),
            width,
        };
        Self::from_data(Data::Symbol(symbol), width)
    }

    /// Constructs the value that refers to an existing `symbol`.
    #[must_use]
    pub fn from_symbol(symbol: Symbol) -> Self {
        let width = symbol.width;
        Self::from_data(Data::Symbol(symbol), width)
    }

    /// Applies `operator` to `operands`, folding constants and simplifying
    /// where possible.
    ///
    /// # Errors
    ///
    /// If the operands do not satisfy the arity or width rules of `operator`.
    pub fn apply(operator: Operator, operands: Vec<Self>) -> Result<Self> {
        let width = operator.result_width(&operands)?;
        if let Some(words) = operands.iter().map(Self::as_word).collect::<Option<Vec<_>>>() {
            return Ok(Self::from_word(eval::fold(operator, &words, width)));
        }
        simplify::simplify(operator, operands, width)
    }

    /// Constructs an expression node without folding or simplification.
    ///
    /// The caller must have validated the operands with
    /// [`Operator::result_width`].
    pub(crate) fn node(operator: Operator, operands: Vec<Self>, width: Width) -> Self {
        Self::from_data(Data::Expression { operator, operands }, width)
    }

    /// Gets the width of the value in bits.
    #[must_use]
    pub fn width(&self) -> Width {
        self.node.width
    }

    /// Gets the data of the value's root node.
    #[must_use]
    pub fn data(&self) -> &Data {
        &self.node.data
    }

    /// Gets the value as a word if it is concrete.
    #[must_use]
    pub fn as_word(&self) -> Option<Word> {
        match &self.node.data {
            Data::Concrete(value) => Some(Word::new(*value, self.width())),
            _ => None,
        }
    }

    /// Gets the value if it is concrete.
    #[must_use]
    pub fn as_concrete(&self) -> Option<U256> {
        self.as_word().map(|w| w.value())
    }

    /// Gets the value as a boolean if it is concrete, treating any non-zero
    /// value as true.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.as_word().map(|w| !w.is_zero())
    }

    /// Gets the value as a `usize` if it is concrete and fits.
    #[must_use]
    pub fn as_usize(&self) -> Option<usize> {
        self.as_word().and_then(|w| w.as_usize())
    }

    /// Checks if the value is concrete.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        matches!(self.node.data, Data::Concrete(_))
    }

    /// Gets the symbol if this value is a bare symbol.
    #[must_use]
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match &self.node.data {
            Data::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// Gets the operator at the root of the value, if it is an expression.
    #[must_use]
    pub fn operator(&self) -> Option<Operator> {
        match &self.node.data {
            Data::Expression { operator, .. } => Some(*operator),
            _ => None,
        }
    }

    /// Gets the operands of the root of the value, which are empty for leaves.
    #[must_use]
    pub fn operands(&self) -> &[Self] {
        match &self.node.data {
            Data::Expression { operands, .. } => operands,
            _ => &[],
        }
    }

    /// Gets the set of free symbols occurring in the value.
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols, &mut HashSet::new());
        symbols
    }

    /// Adds the free symbols of the value to `symbols`, skipping any node
    /// already in `visited`.
    pub(crate) fn collect_symbols(&self, symbols: &mut BTreeSet<Symbol>, visited: &mut HashSet<usize>) {
        if !visited.insert(self.address()) {
            return;
        }
        match &self.node.data {
            Data::Concrete(_) => (),
            Data::Symbol(symbol) => {
                symbols.insert(symbol.clone());
            }
            Data::Expression { operands, .. } => {
                operands.iter().for_each(|o| o.collect_symbols(symbols, visited));
            }
        }
    }

    /// Gets the number of nodes in the value, counting shared subtrees each
    /// time they occur.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.operands().iter().map(Self::size).sum::<usize>()
    }

    /// Renders the value with symbol identities erased, so that values built
    /// the same way from different symbols with the same names render the
    /// same.
    #[must_use]
    pub fn shape(&self) -> String {
        self.to_string()
    }

    /// Gets a hash of the value that ignores symbol identities.
    #[must_use]
    pub fn shape_hash(&self) -> u64 {
        self.node.shape_hash
    }

    /// Gets the cached structural hash of the value, which accounts for symbol
    /// identities.
    pub(crate) fn identity_hash(&self) -> u64 {
        self.node.hash
    }

    /// Gets a stable address for the node, used for memoisation keyed on
    /// physical identity.
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }

    /// Constructs the predicate `self != 0` as a single-bit value.
    ///
    /// # Errors
    ///
    /// Never for well-formed values, but the width checks are propagated.
    pub fn truthy(&self) -> Result<Self> {
        if self.width() == BOOL_WIDTH_BITS {
            return Ok(self.clone());
        }
        let zero = Self::constant(0u8, self.width());
        let is_zero = Self::apply(Operator::Eq, vec![self.clone(), zero])?;
        Self::apply(Operator::BoolNot, vec![is_zero])
    }

    /// Negates the single-bit predicate `self`.
    ///
    /// # Errors
    ///
    /// If `self` is not a single-bit value.
    pub fn bool_not(&self) -> Result<Self> {
        Self::apply(Operator::BoolNot, vec![self.clone()])
    }

    /// Zero extends the value to `width`.
    ///
    /// # Errors
    ///
    /// If `width` is smaller than the width of the value.
    pub fn zero_extend(&self, width: Width) -> Result<Self> {
        if width == self.width() {
            return Ok(self.clone());
        }
        Self::apply(Operator::ZeroExtend(width), vec![self.clone()])
    }

    /// Extracts the bits `high..=low` of the value.
    ///
    /// # Errors
    ///
    /// If the range is not within the value.
    pub fn extract(&self, high: Width, low: Width) -> Result<Self> {
        Self::apply(Operator::Extract { high, low }, vec![self.clone()])
    }

    /// Gets the byte at `index`, counting from the most significant byte, as a
    /// byte-wide value.
    ///
    /// # Errors
    ///
    /// If `index` is not within the value.
    pub fn byte_at(&self, index: usize) -> Result<Self> {
        let byte_count = usize::from(self.width() / BYTE_SIZE_BITS);
        let low = Width::try_from((byte_count.saturating_sub(index + 1)) * 8).unwrap_or(Width::MAX);
        self.extract(low + 7, low)
    }

    /// Concatenates `parts`, with the first part in the most significant
    /// position.
    ///
    /// # Errors
    ///
    /// If there are no parts or they are too wide to concatenate.
    pub fn concat(parts: Vec<Self>) -> Result<Self> {
        Self::apply(Operator::Concat, parts)
    }

    /// Constructs `if condition then if_true else if_false`.
    ///
    /// # Errors
    ///
    /// If `condition` is not a single bit, or the branches differ in width.
    pub fn ite(condition: Self, if_true: Self, if_false: Self) -> Result<Self> {
        Self::apply(Operator::Ite, vec![condition, if_true, if_false])
    }

    /// Constructs the Keccak-256 hash of the big-endian sequence of `bytes`.
    ///
    /// # Errors
    ///
    /// If any of `bytes` is not byte-wide.
    pub fn keccak(bytes: Vec<Self>) -> Result<Self> {
        Self::apply(Operator::Keccak256, bytes)
    }

    /// Builds the node for `data`, computing its cached hashes.
    fn from_data(data: Data, width: Width) -> Self {
        let mut hasher = DefaultHasher::new();
        let mut shape_hasher = DefaultHasher::new();
        width.hash(&mut hasher);
        width.hash(&mut shape_hasher);
        match &data {
            Data::Concrete(value) => {
                0u8.hash(&mut hasher);
                0u8.hash(&mut shape_hasher);
                value.hash(&mut hasher);
                value.hash(&mut shape_hasher);
            }
            Data::Symbol(symbol) => {
                1u8.hash(&mut hasher);
                1u8.hash(&mut shape_hasher);
                symbol.id.hash(&mut hasher);
                symbol.name.hash(&mut shape_hasher);
            }
            Data::Expression { operator, operands } => {
                2u8.hash(&mut hasher);
                2u8.hash(&mut shape_hasher);
                operator.hash(&mut hasher);
                operator.hash(&mut shape_hasher);
                for operand in operands {
                    operand.node.hash.hash(&mut hasher);
                    operand.node.shape_hash.hash(&mut shape_hasher);
                }
            }
        }
        let node = Node {
            data,
            width,
            hash: hasher.finish(),
            shape_hash: shape_hasher.finish(),
        };
        Self {
            node: Arc::new(node),
        }
    }
}

impl PartialEq for SymbolicValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
            || (self.node.hash == other.node.hash
                && self.node.width == other.node.width
                && self.node.data == other.node.data)
    }
}

impl Eq for SymbolicValue {}

impl Hash for SymbolicValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.node.hash);
    }
}

impl Display for SymbolicValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.node.data {
            Data::Concrete(value) => write!(f, "{}", Word::new(*value, self.width())),
            Data::Symbol(symbol) => write!(f, "{symbol}"),
            Data::Expression { operator, operands } => {
                write!(f, "({operator} {})", operands.iter().join(" "))
            }
        }
    }
}

impl Debug for SymbolicValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}:{}", self.width())
    }
}

impl From<Word> for SymbolicValue {
    fn from(value: Word) -> Self {
        Self::from_word(value)
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        error::expression::Error,
        expr::{Data, Operator, SymbolicValue},
    };

    #[test]
    fn constants_fold_eagerly() -> anyhow::Result<()> {
        let a = SymbolicValue::word(7u8);
        let b = SymbolicValue::word(5u8);
        let sum = SymbolicValue::apply(Operator::Add, vec![a.clone(), b.clone()])?;
        assert_eq!(sum.as_concrete(), Some(U256::from(12u8)));

        let lt = SymbolicValue::apply(Operator::Ult, vec![b, a])?;
        assert_eq!(lt.width(), 1);
        assert_eq!(lt.as_bool(), Some(true));

        Ok(())
    }

    #[test]
    fn division_by_concrete_zero_is_zero() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let zero = SymbolicValue::word(0u8);
        let result = SymbolicValue::apply(Operator::UDiv, vec![x, zero])?;
        assert_eq!(result.as_concrete(), Some(U256::ZERO));

        Ok(())
    }

    #[test]
    fn symbolic_operands_build_expressions() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let one = SymbolicValue::word(1u8);
        let sum = SymbolicValue::apply(Operator::Add, vec![x.clone(), one])?;
        assert_eq!(sum.operator(), Some(Operator::Add));
        assert_eq!(sum.width(), 256);
        assert!(matches!(x.data(), Data::Symbol(_)));
        assert_eq!(sum.symbols().len(), 1);

        Ok(())
    }

    #[test]
    fn fresh_symbols_are_distinct() {
        let a = SymbolicValue::fresh_symbol(256, "x");
        let b = SymbolicValue::fresh_symbol(256, "x");
        assert_ne!(a, b);
        assert_eq!(a.shape_hash(), b.shape_hash());
        assert_eq!(a, a.clone());
    }

    #[test]
    fn structurally_equal_values_are_equal() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let y = SymbolicValue::fresh_symbol(256, "y");
        let first = SymbolicValue::apply(Operator::Mul, vec![x.clone(), y.clone()])?;
        let second = SymbolicValue::apply(Operator::Mul, vec![y, x])?;
        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn mismatched_widths_are_rejected() {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let y = SymbolicValue::fresh_symbol(8, "y");
        let result = SymbolicValue::apply(Operator::Add, vec![x, y]);
        assert_eq!(
            result,
            Err(Error::WidthMismatch {
                operator: Operator::Add,
                expected: 256,
                found:    8,
            })
        );
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let result = SymbolicValue::apply(Operator::Sub, vec![x]);
        assert!(matches!(result, Err(Error::ArityMismatch { .. })));
    }

    #[test]
    fn byte_extraction_reassembles() -> anyhow::Result<()> {
        let x = SymbolicValue::fresh_symbol(256, "x");
        let bytes = (0..32).map(|i| x.byte_at(i)).collect::<Result<Vec<_>, _>>()?;
        let whole = SymbolicValue::concat(bytes)?;
        assert_eq!(whole, x);

        Ok(())
    }

    #[test]
    fn keccak_folds_concrete_input() -> anyhow::Result<()> {
        let hash = SymbolicValue::keccak(vec![])?;
        assert_eq!(
            hash.to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );

        let symbolic = SymbolicValue::keccak(vec![SymbolicValue::fresh_symbol(8, "b")])?;
        assert_eq!(symbolic.operator(), Some(Operator::Keccak256));

        Ok(())
    }
}
