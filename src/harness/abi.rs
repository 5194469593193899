//! This module contains the parts of the Solidity ABI that the harness needs:
//! reading JSON ABI descriptions, computing function selectors and encoding
//! call data.
//!
//! # Encoding
//!
//! Arguments are encoded as sequences of byte-wide symbolic values, so that a
//! symbolic argument stays symbolic in the call data. Static elementary types
//! are supported with both concrete and symbolic values, while the dynamic
//! `bytes` and `string` types are supported with concrete values only.

use std::fmt::{Display, Formatter};

use ethnum::U256;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::{
    constant::{SELECTOR_WIDTH_BYTES, WORD_SIZE_BITS, WORD_SIZE_BYTES},
    error::{
        harness::{Error, Result as HarnessResult},
        Result,
    },
    expr::{Operator, SymbolicValue},
    vm::state::symbolic_bytes,
    world::Address,
};

/// A parameter of a function, constructor or event in a JSON ABI.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Param {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Param>,
}

impl Param {
    /// Parses the type of the parameter.
    ///
    /// # Errors
    ///
    /// If the type is not a valid ABI type.
    pub fn param_type(&self) -> HarnessResult<ParamType> {
        ParamType::parse(&self.kind, &self.components)
    }
}

/// A function in a JSON ABI.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,

    #[serde(default)]
    pub inputs: Vec<Param>,

    #[serde(default)]
    pub outputs: Vec<Param>,

    #[serde(default, rename = "stateMutability")]
    pub state_mutability: String,
}

impl Function {
    /// Gets the canonical signature of the function, such as
    /// `transfer(address,uint256)`.
    ///
    /// # Errors
    ///
    /// If a parameter has an invalid type.
    pub fn signature(&self) -> HarnessResult<String> {
        let inputs: Vec<ParamType> = self.input_types()?;
        Ok(format!("{}({})", self.name, inputs.iter().join(",")))
    }

    /// Gets the four-byte selector of the function.
    ///
    /// # Errors
    ///
    /// If a parameter has an invalid type.
    pub fn selector(&self) -> HarnessResult<[u8; 4]> {
        Ok(selector(&self.signature()?))
    }

    /// Gets the types of the function's inputs.
    ///
    /// # Errors
    ///
    /// If a parameter has an invalid type.
    pub fn input_types(&self) -> HarnessResult<Vec<ParamType>> {
        self.inputs.iter().map(Param::param_type).collect()
    }

    /// Checks if the function accepts value.
    #[must_use]
    pub fn is_payable(&self) -> bool {
        self.state_mutability == "payable"
    }
}

/// The constructor in a JSON ABI.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Constructor {
    #[serde(default)]
    pub inputs: Vec<Param>,

    #[serde(default, rename = "stateMutability")]
    pub state_mutability: String,
}

impl Constructor {
    /// Gets the types of the constructor's inputs.
    ///
    /// # Errors
    ///
    /// If a parameter has an invalid type.
    pub fn input_types(&self) -> HarnessResult<Vec<ParamType>> {
        self.inputs.iter().map(Param::param_type).collect()
    }
}

/// An entry of a JSON ABI.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    Function(Function),
    Constructor(Constructor),

    /// Events, errors, and the fallback and receive functions, none of which
    /// the harness calls by name.
    #[serde(other)]
    Other,
}

/// The ABI of a contract, as emitted by `solc` and `forge`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Abi {
    items: Vec<Item>,
}

impl Abi {
    /// Parses an ABI from its JSON representation.
    ///
    /// # Errors
    ///
    /// If `json` is not a valid ABI.
    pub fn from_json(json: &str) -> HarnessResult<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidAbi(e.to_string()))
    }

    /// Gets every function in the ABI.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    /// Gets the constructor, if the ABI declares one.
    #[must_use]
    pub fn constructor(&self) -> Option<&Constructor> {
        self.items.iter().find_map(|item| match item {
            Item::Constructor(c) => Some(c),
            _ => None,
        })
    }

    /// Finds the function called `name`, which is either a bare name or a
    /// full signature such as `withdraw(uint256)`.
    ///
    /// # Errors
    ///
    /// If no function matches, or a bare name matches more than one overload.
    pub fn function(&self, name: &str) -> HarnessResult<&Function> {
        if name.contains('(') {
            for function in self.functions() {
                if function.signature()? == name {
                    return Ok(function);
                }
            }
            return Err(Error::UnknownFunction(name.into()));
        }

        let mut matches = self.functions().filter(|f| f.name == name);
        let found = matches.next().ok_or_else(|| Error::UnknownFunction(name.into()))?;
        if matches.next().is_some() {
            return Err(Error::AmbiguousFunction(name.into()));
        }
        Ok(found)
    }
}

/// The type of an ABI parameter.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ParamType {
    Address,
    Bool,
    Uint(u16),
    Int(u16),
    FixedBytes(u8),
    Bytes,
    String,
    Array(Box<ParamType>, Option<usize>),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    /// Parses the type named `kind`, with `components` describing the members
    /// of tuple types.
    ///
    /// # Errors
    ///
    /// If `kind` is not a valid ABI type.
    pub fn parse(kind: &str, components: &[Param]) -> HarnessResult<Self> {
        let unsupported = || Error::UnsupportedType(kind.into());

        if let Some(open) = kind.strip_suffix(']').and_then(|k| k.rfind('[')) {
            let element = Self::parse(&kind[..open], components)?;
            let size = &kind[open + 1..kind.len() - 1];
            let size = if size.is_empty() {
                None
            } else {
                Some(size.parse().map_err(|_| unsupported())?)
            };
            return Ok(Self::Array(Box::new(element), size));
        }

        let sized = |prefix: &str, default: u16| -> Option<u16> {
            let size = kind.strip_prefix(prefix)?;
            if size.is_empty() {
                Some(default)
            } else {
                size.parse().ok()
            }
        };

        let parsed = match kind {
            "address" => Self::Address,
            "bool" => Self::Bool,
            "bytes" => Self::Bytes,
            "string" => Self::String,
            "tuple" => Self::Tuple(components.iter().map(Param::param_type).collect::<HarnessResult<_>>()?),
            _ if kind.starts_with("uint") => {
                let bits = sized("uint", WORD_SIZE_BITS).ok_or_else(unsupported)?;
                if bits == 0 || bits > WORD_SIZE_BITS || bits % 8 != 0 {
                    return Err(unsupported());
                }
                Self::Uint(bits)
            }
            _ if kind.starts_with("int") => {
                let bits = sized("int", WORD_SIZE_BITS).ok_or_else(unsupported)?;
                if bits == 0 || bits > WORD_SIZE_BITS || bits % 8 != 0 {
                    return Err(unsupported());
                }
                Self::Int(bits)
            }
            _ if kind.starts_with("bytes") => {
                let size = sized("bytes", 0).ok_or_else(unsupported)?;
                if size == 0 || usize::from(size) > WORD_SIZE_BYTES {
                    return Err(unsupported());
                }
                Self::FixedBytes(u8::try_from(size).map_err(|_| unsupported())?)
            }
            _ => return Err(unsupported()),
        };
        Ok(parsed)
    }

    /// Checks if values of the type are encoded out of line.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Bytes | Self::String | Self::Array(_, None) => true,
            Self::Array(element, Some(_)) => element.is_dynamic(),
            Self::Tuple(members) => members.iter().any(Self::is_dynamic),
            _ => false,
        }
    }

    /// Builds the predicate that a word holds a valid value of the type, or
    /// [`None`] if every word is valid.
    fn range_check(&self, word: &SymbolicValue) -> Result<Option<SymbolicValue>> {
        let check = match self {
            Self::Address => Self::Uint(160).range_check(word)?,
            Self::Bool => Some(SymbolicValue::apply(Operator::Ule, vec![
                word.clone(),
                SymbolicValue::word(1u8),
            ])?),
            Self::Uint(bits) if *bits < WORD_SIZE_BITS => {
                let max = (U256::ONE << u32::from(*bits)) - 1;
                Some(SymbolicValue::apply(Operator::Ule, vec![
                    word.clone(),
                    SymbolicValue::word(max),
                ])?)
            }
            Self::Int(bits) if *bits < WORD_SIZE_BITS => {
                // Shifting the signed range up by half makes it a contiguous
                // unsigned range starting at zero.
                let half = U256::ONE << u32::from(*bits - 1);
                let shifted =
                    SymbolicValue::apply(Operator::Add, vec![word.clone(), SymbolicValue::word(half)])?;
                Some(SymbolicValue::apply(Operator::Ult, vec![
                    shifted,
                    SymbolicValue::word(half << 1),
                ])?)
            }
            Self::FixedBytes(size) if usize::from(*size) < WORD_SIZE_BYTES => {
                let unused_bits = u32::try_from(WORD_SIZE_BYTES - usize::from(*size)).unwrap_or(0) * 8;
                let unused = (U256::ONE << unused_bits) - 1;
                let masked =
                    SymbolicValue::apply(Operator::And, vec![word.clone(), SymbolicValue::word(unused)])?;
                Some(SymbolicValue::apply(Operator::Eq, vec![
                    masked,
                    SymbolicValue::word(0u8),
                ])?)
            }
            _ => None,
        };
        Ok(check)
    }
}

impl Display for ParamType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::Bool => write!(f, "bool"),
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::FixedBytes(size) => write!(f, "bytes{size}"),
            Self::Bytes => write!(f, "bytes"),
            Self::String => write!(f, "string"),
            Self::Array(element, Some(size)) => write!(f, "{element}[{size}]"),
            Self::Array(element, None) => write!(f, "{element}[]"),
            Self::Tuple(members) => write!(f, "({})", members.iter().join(",")),
        }
    }
}

/// An argument to a function call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    /// A value of a static type, which may be symbolic.
    Word(SymbolicValue),

    /// A concrete byte string, for `bytes` and left-aligned `bytesN`.
    Bytes(Vec<u8>),

    /// A concrete string.
    String(String),
}

impl Value {
    /// Gets the type the value is encoded as when no ABI says otherwise.
    #[must_use]
    pub fn natural_type(&self) -> ParamType {
        match self {
            Self::Word(_) => ParamType::Uint(WORD_SIZE_BITS),
            Self::Bytes(_) => ParamType::Bytes,
            Self::String(_) => ParamType::String,
        }
    }

    /// Describes the kind of the value for error messages.
    fn describe(&self) -> String {
        match self {
            Self::Word(w) if w.is_concrete() => "a concrete word".into(),
            Self::Word(_) => "a symbolic word".into(),
            Self::Bytes(b) => format!("{} bytes", b.len()),
            Self::String(_) => "a string".into(),
        }
    }
}

impl From<SymbolicValue> for Value {
    fn from(value: SymbolicValue) -> Self {
        Self::Word(value)
    }
}

impl From<U256> for Value {
    fn from(value: U256) -> Self {
        Self::Word(SymbolicValue::word(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Word(SymbolicValue::word(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Word(SymbolicValue::word(u8::from(value)))
    }
}

impl From<Address> for Value {
    fn from(value: Address) -> Self {
        Self::Word(value.as_word())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

/// Encoded call data, together with the constraints that bound its symbolic
/// arguments to their types.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Encoded {
    pub data:        Vec<SymbolicValue>,
    pub constraints: Vec<SymbolicValue>,
}

/// Computes the selector of the function with the canonical `signature`.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut selector = [0; SELECTOR_WIDTH_BYTES];
    selector.copy_from_slice(&hash[..SELECTOR_WIDTH_BYTES]);
    selector
}

/// Encodes a call of the function with `selector` on `args`.
///
/// # Errors
///
/// If an argument does not fit its type, or its type cannot be encoded.
pub fn encode_call(
    selector: [u8; 4],
    types: &[ParamType],
    args: &[Value],
    bound: bool,
) -> Result<Encoded> {
    let mut encoded = encode(types, args, bound)?;
    let mut data = symbolic_bytes(&selector);
    data.append(&mut encoded.data);
    encoded.data = data;
    Ok(encoded)
}

/// Encodes `args` as values of `types`, constraining symbolic words to their
/// type if `bound` is set.
///
/// # Errors
///
/// If the arguments do not match the types, or a type cannot be encoded.
pub fn encode(types: &[ParamType], args: &[Value], bound: bool) -> Result<Encoded> {
    if types.len() != args.len() {
        return Err(Error::ArgumentCount {
            function: types.iter().join(","),
            expected: types.len(),
            found:    args.len(),
        }
        .into());
    }

    let mut head = Vec::new();
    let mut tail = Vec::new();
    let mut constraints = Vec::new();
    let head_size = types.len() * WORD_SIZE_BYTES;

    for (index, (kind, arg)) in types.iter().zip(args).enumerate() {
        let mismatch = || Error::ArgumentType {
            index,
            expected: kind.to_string(),
            found: arg.describe(),
        };

        match (kind, arg) {
            (ParamType::Bytes, Value::Bytes(bytes)) => {
                head.extend(word_bytes(&SymbolicValue::word(usize_word(head_size + tail.len())))?);
                tail.extend(dynamic_bytes(bytes)?);
            }
            (ParamType::String, Value::String(text)) => {
                head.extend(word_bytes(&SymbolicValue::word(usize_word(head_size + tail.len())))?);
                tail.extend(dynamic_bytes(text.as_bytes())?);
            }
            (ParamType::FixedBytes(size), Value::Bytes(bytes)) => {
                if bytes.len() > usize::from(*size) {
                    return Err(mismatch().into());
                }
                let mut padded = bytes.clone();
                padded.resize(WORD_SIZE_BYTES, 0);
                head.extend(symbolic_bytes(&padded));
            }
            (
                ParamType::Address
                | ParamType::Bool
                | ParamType::Uint(_)
                | ParamType::Int(_)
                | ParamType::FixedBytes(_),
                Value::Word(word),
            ) => {
                let word = as_word(word).ok_or_else(mismatch)?;
                if let Some(check) = kind.range_check(&word)? {
                    match check.as_bool() {
                        Some(true) => (),
                        Some(false) => return Err(mismatch().into()),
                        None if bound => constraints.push(check),
                        None => (),
                    }
                }
                head.extend(word_bytes(&word)?);
            }
            (ParamType::Array(..) | ParamType::Tuple(_), _) => {
                return Err(Error::UnsupportedType(kind.to_string()).into());
            }
            _ => return Err(mismatch().into()),
        }
    }

    head.append(&mut tail);
    Ok(Encoded {
        data: head,
        constraints,
    })
}

/// Widens `value` to a full word, if it is not wider than one.
fn as_word(value: &SymbolicValue) -> Option<SymbolicValue> {
    match value.width() {
        WORD_SIZE_BITS => Some(value.clone()),
        w if w < WORD_SIZE_BITS => value.zero_extend(WORD_SIZE_BITS).ok(),
        _ => None,
    }
}

/// Splits a word into its bytes, most significant first.
fn word_bytes(word: &SymbolicValue) -> Result<Vec<SymbolicValue>> {
    let bytes = (0..WORD_SIZE_BYTES)
        .map(|i| word.byte_at(i))
        .collect::<std::result::Result<_, _>>()?;
    Ok(bytes)
}

/// Encodes `bytes` as the length-prefixed, zero-padded tail of a dynamic
/// value.
fn dynamic_bytes(bytes: &[u8]) -> Result<Vec<SymbolicValue>> {
    let mut encoded = word_bytes(&SymbolicValue::word(usize_word(bytes.len())))?;
    let mut padded = bytes.to_vec();
    padded.resize(bytes.len().div_ceil(WORD_SIZE_BYTES) * WORD_SIZE_BYTES, 0);
    encoded.extend(symbolic_bytes(&padded));
    Ok(encoded)
}

fn usize_word(value: usize) -> U256 {
    U256::from(u64::try_from(value).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        error::{harness, Error},
        expr::SymbolicValue,
        harness::abi::{encode, encode_call, selector, Abi, ParamType, Value},
        vm::state::concrete_bytes,
    };

    const BANK_ABI: &str = r#"[
        {"type": "constructor", "inputs": [], "stateMutability": "nonpayable"},
        {"type": "function", "name": "deposit", "inputs": [], "outputs": [],
         "stateMutability": "payable"},
        {"type": "function", "name": "withdraw",
         "inputs": [{"name": "amount", "type": "uint256"}], "outputs": [],
         "stateMutability": "nonpayable"},
        {"type": "function", "name": "balanceOf",
         "inputs": [{"name": "who", "type": "address"}],
         "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"},
        {"type": "event", "name": "Deposit", "anonymous": false,
         "inputs": [{"name": "who", "type": "address", "indexed": true}]}
    ]"#;

    #[test]
    fn computes_known_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("Panic(uint256)"), [0x4e, 0x48, 0x7b, 0x71]);
    }

    #[test]
    fn reads_functions_from_json() -> anyhow::Result<()> {
        let abi = Abi::from_json(BANK_ABI)?;

        assert_eq!(abi.functions().count(), 3);
        assert!(abi.constructor().is_some());
        let withdraw = abi.function("withdraw")?;
        assert_eq!(withdraw.signature()?, "withdraw(uint256)");
        assert_eq!(withdraw.selector()?, selector("withdraw(uint256)"));
        assert!(abi.function("deposit")?.is_payable());
        assert_eq!(abi.function("balanceOf(address)")?.name, "balanceOf");
        assert_eq!(
            abi.function("steal"),
            Err(harness::Error::UnknownFunction("steal".into()))
        );

        Ok(())
    }

    #[test]
    fn parses_composite_types() -> anyhow::Result<()> {
        let kind = ParamType::parse("uint8[2][]", &[])?;
        assert_eq!(kind.to_string(), "uint8[2][]");
        assert!(kind.is_dynamic());
        assert_eq!(ParamType::parse("uint", &[])?, ParamType::Uint(256));
        assert!(ParamType::parse("uint7", &[]).is_err());
        assert!(ParamType::parse("bytes33", &[]).is_err());

        Ok(())
    }

    #[test]
    fn encodes_static_and_dynamic_arguments() -> anyhow::Result<()> {
        let encoded = encode_call(
            selector("f(uint8,bytes)"),
            &[ParamType::Uint(8), ParamType::Bytes],
            &[Value::from(7u64), Value::Bytes(vec![0xab, 0xcd])],
            true,
        )?;
        let bytes = concrete_bytes(&encoded.data).ok_or_else(|| anyhow::anyhow!("Symbolic"))?;

        assert_eq!(bytes.len(), 4 + 32 * 4);
        assert_eq!(bytes[4 + 31], 7);
        assert_eq!(bytes[4 + 63], 0x40);
        assert_eq!(bytes[4 + 95], 2);
        assert_eq!(&bytes[4 + 96..4 + 98], &[0xab, 0xcd]);
        assert!(encoded.constraints.is_empty());

        Ok(())
    }

    #[test]
    fn bounds_symbolic_arguments_on_request() -> anyhow::Result<()> {
        let amount = SymbolicValue::fresh_symbol(256, "amount");
        let bounded = encode(&[ParamType::Uint(64)], &[Value::from(amount.clone())], true)?;
        let unbounded = encode(&[ParamType::Uint(64)], &[Value::from(amount)], false)?;

        assert_eq!(bounded.constraints.len(), 1);
        assert!(unbounded.constraints.is_empty());
        assert_eq!(bounded.data.len(), 32);

        Ok(())
    }

    #[test]
    fn rejects_concrete_arguments_out_of_range() {
        let result = encode(&[ParamType::Uint(8)], &[Value::from(U256::from(256u32))], true);
        assert!(matches!(
            result,
            Err(Error::Harness(harness::Error::ArgumentType { index: 0, .. }))
        ));

        let result = encode(&[ParamType::Uint(8)], &[], true);
        assert!(matches!(
            result,
            Err(Error::Harness(harness::Error::ArgumentCount { .. }))
        ));
    }
}
