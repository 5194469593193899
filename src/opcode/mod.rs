//! This module contains the [`Opcode`] enum, the closed set of instructions
//! understood by the interpreter, together with their static metadata.
//!
//! The symbolic semantics of the opcodes live in the submodules, grouped the
//! same way as the opcodes themselves, and are dispatched from
//! [`crate::vm::Interpreter`] by a single `match`.
//!
//! # Terminology
//!
//! When referring to stack slots, we treat index 1 as being the top of the
//! stack.

pub mod arithmetic;
pub mod asm;
pub mod control;
pub mod environment;
pub mod logic;
pub mod macros;
pub mod memory;
pub mod system;

use std::fmt::{Display, Formatter};

use ethnum::U256;

use crate::{
    constant::{
        DUP_OPCODE_BASE_VALUE,
        LOG_OPCODE_BASE_VALUE,
        PUSH_OPCODE_BASE_VALUE,
        PUSH_OPCODE_MAX_BYTES,
        SWAP_OPCODE_BASE_VALUE,
    },
    error::disassembly::Error,
};

/// The instructions of the EVM as of the Shanghai hard fork.
///
/// Two variants have no byte of their own. [`Opcode::Nop`] fills the byte
/// offsets taken up by push data so that a program can be indexed by byte
/// offset, and [`Opcode::Invalid`] stands in for any byte that is not a known
/// instruction.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Opcode {
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    SDiv,
    Mod,
    SMod,
    AddMod,
    MulMod,
    Exp,
    SignExtend,
    Lt,
    Gt,
    SLt,
    SGt,
    Eq,
    IsZero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,
    Sha3,
    Address,
    Balance,
    Origin,
    Caller,
    CallValue,
    CallDataLoad,
    CallDataSize,
    CallDataCopy,
    CodeSize,
    CodeCopy,
    GasPrice,
    ExtCodeSize,
    ExtCodeCopy,
    ReturnDataSize,
    ReturnDataCopy,
    ExtCodeHash,
    BlockHash,
    Coinbase,
    Timestamp,
    Number,
    Prevrandao,
    GasLimit,
    ChainId,
    SelfBalance,
    BaseFee,
    Pop,
    MLoad,
    MStore,
    MStore8,
    SLoad,
    SStore,
    Jump,
    JumpI,
    PC,
    MSize,
    Gas,
    JumpDest,

    /// `PUSH0` to `PUSH32`, carrying the value to push.
    Push { size: u8, value: U256 },

    /// `DUP1` to `DUP16`.
    Dup(u8),

    /// `SWAP1` to `SWAP16`.
    Swap(u8),

    /// `LOG0` to `LOG4`, carrying the number of topics.
    Log(u8),

    Create,
    Call,
    CallCode,
    Return,
    DelegateCall,
    Create2,
    StaticCall,
    Revert,

    /// Any byte that does not encode an instruction, including the designated
    /// `INVALID` instruction `0xfe`.
    Invalid(u8),

    SelfDestruct,

    /// Filler for the bytes of push data.
    Nop,
}

impl Opcode {
    /// Constructs a `PUSH` of `size` bytes whose data is `bytes`.
    ///
    /// If fewer than `size` bytes are provided, the missing low-order bytes
    /// are zero, as for a push that is cut off by the end of the code.
    ///
    /// # Errors
    ///
    /// If `size` is larger than 32, or more than `size` bytes are provided.
    pub fn push(size: u8, bytes: &[u8]) -> Result<Self, Error> {
        if size > PUSH_OPCODE_MAX_BYTES || bytes.len() > usize::from(size) {
            return Err(Error::InvalidPushSize(size));
        }
        let mut buffer = [0u8; 32];
        let start = 32 - usize::from(size);
        buffer[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(Self::Push {
            size,
            value: U256::from_be_bytes(buffer),
        })
    }

    /// Constructs the shortest `PUSH` that pushes `value`.
    #[must_use]
    pub fn push_value(value: impl Into<U256>) -> Self {
        let value = value.into();
        let size = u8::try_from((256 - value.leading_zeros()).div_ceil(8)).unwrap_or(32);
        Self::Push { size, value }
    }

    /// Constructs `DUPN` for `1 <= n <= 16`.
    ///
    /// # Errors
    ///
    /// If `n` is out of range.
    pub fn dup(n: u8) -> Result<Self, Error> {
        if (1..=16).contains(&n) {
            Ok(Self::Dup(n))
        } else {
            Err(Error::InvalidStackItem {
                item: n,
                name: "DUP".into(),
            })
        }
    }

    /// Constructs `SWAPN` for `1 <= n <= 16`.
    ///
    /// # Errors
    ///
    /// If `n` is out of range.
    pub fn swap(n: u8) -> Result<Self, Error> {
        if (1..=16).contains(&n) {
            Ok(Self::Swap(n))
        } else {
            Err(Error::InvalidStackItem {
                item: n,
                name: "SWAP".into(),
            })
        }
    }

    /// Constructs `LOGN` for `n <= 4`.
    ///
    /// # Errors
    ///
    /// If `n` is out of range.
    pub fn log(n: u8) -> Result<Self, Error> {
        if n <= 4 {
            Ok(Self::Log(n))
        } else {
            Err(Error::InvalidTopicCount(n))
        }
    }

    /// Decodes the single-byte instruction `byte`.
    ///
    /// Pushes decode with zero data, as their data follows them in the code.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Stop,
            0x01 => Self::Add,
            0x02 => Self::Mul,
            0x03 => Self::Sub,
            0x04 => Self::Div,
            0x05 => Self::SDiv,
            0x06 => Self::Mod,
            0x07 => Self::SMod,
            0x08 => Self::AddMod,
            0x09 => Self::MulMod,
            0x0a => Self::Exp,
            0x0b => Self::SignExtend,
            0x10 => Self::Lt,
            0x11 => Self::Gt,
            0x12 => Self::SLt,
            0x13 => Self::SGt,
            0x14 => Self::Eq,
            0x15 => Self::IsZero,
            0x16 => Self::And,
            0x17 => Self::Or,
            0x18 => Self::Xor,
            0x19 => Self::Not,
            0x1a => Self::Byte,
            0x1b => Self::Shl,
            0x1c => Self::Shr,
            0x1d => Self::Sar,
            0x20 => Self::Sha3,
            0x30 => Self::Address,
            0x31 => Self::Balance,
            0x32 => Self::Origin,
            0x33 => Self::Caller,
            0x34 => Self::CallValue,
            0x35 => Self::CallDataLoad,
            0x36 => Self::CallDataSize,
            0x37 => Self::CallDataCopy,
            0x38 => Self::CodeSize,
            0x39 => Self::CodeCopy,
            0x3a => Self::GasPrice,
            0x3b => Self::ExtCodeSize,
            0x3c => Self::ExtCodeCopy,
            0x3d => Self::ReturnDataSize,
            0x3e => Self::ReturnDataCopy,
            0x3f => Self::ExtCodeHash,
            0x40 => Self::BlockHash,
            0x41 => Self::Coinbase,
            0x42 => Self::Timestamp,
            0x43 => Self::Number,
            0x44 => Self::Prevrandao,
            0x45 => Self::GasLimit,
            0x46 => Self::ChainId,
            0x47 => Self::SelfBalance,
            0x48 => Self::BaseFee,
            0x50 => Self::Pop,
            0x51 => Self::MLoad,
            0x52 => Self::MStore,
            0x53 => Self::MStore8,
            0x54 => Self::SLoad,
            0x55 => Self::SStore,
            0x56 => Self::Jump,
            0x57 => Self::JumpI,
            0x58 => Self::PC,
            0x59 => Self::MSize,
            0x5a => Self::Gas,
            0x5b => Self::JumpDest,
            0x5f..=0x7f => Self::Push {
                size:  byte - PUSH_OPCODE_BASE_VALUE,
                value: U256::ZERO,
            },
            0x80..=0x8f => Self::Dup(byte - DUP_OPCODE_BASE_VALUE),
            0x90..=0x9f => Self::Swap(byte - SWAP_OPCODE_BASE_VALUE),
            0xa0..=0xa4 => Self::Log(byte - LOG_OPCODE_BASE_VALUE),
            0xf0 => Self::Create,
            0xf1 => Self::Call,
            0xf2 => Self::CallCode,
            0xf3 => Self::Return,
            0xf4 => Self::DelegateCall,
            0xf5 => Self::Create2,
            0xfa => Self::StaticCall,
            0xfd => Self::Revert,
            0xff => Self::SelfDestruct,
            other => Self::Invalid(other),
        }
    }

    /// Gets the byte representation of the opcode.
    ///
    /// [`Opcode::Nop`] has no byte of its own and reports `0x00`.
    #[must_use]
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Stop | Self::Nop => 0x00,
            Self::Add => 0x01,
            Self::Mul => 0x02,
            Self::Sub => 0x03,
            Self::Div => 0x04,
            Self::SDiv => 0x05,
            Self::Mod => 0x06,
            Self::SMod => 0x07,
            Self::AddMod => 0x08,
            Self::MulMod => 0x09,
            Self::Exp => 0x0a,
            Self::SignExtend => 0x0b,
            Self::Lt => 0x10,
            Self::Gt => 0x11,
            Self::SLt => 0x12,
            Self::SGt => 0x13,
            Self::Eq => 0x14,
            Self::IsZero => 0x15,
            Self::And => 0x16,
            Self::Or => 0x17,
            Self::Xor => 0x18,
            Self::Not => 0x19,
            Self::Byte => 0x1a,
            Self::Shl => 0x1b,
            Self::Shr => 0x1c,
            Self::Sar => 0x1d,
            Self::Sha3 => 0x20,
            Self::Address => 0x30,
            Self::Balance => 0x31,
            Self::Origin => 0x32,
            Self::Caller => 0x33,
            Self::CallValue => 0x34,
            Self::CallDataLoad => 0x35,
            Self::CallDataSize => 0x36,
            Self::CallDataCopy => 0x37,
            Self::CodeSize => 0x38,
            Self::CodeCopy => 0x39,
            Self::GasPrice => 0x3a,
            Self::ExtCodeSize => 0x3b,
            Self::ExtCodeCopy => 0x3c,
            Self::ReturnDataSize => 0x3d,
            Self::ReturnDataCopy => 0x3e,
            Self::ExtCodeHash => 0x3f,
            Self::BlockHash => 0x40,
            Self::Coinbase => 0x41,
            Self::Timestamp => 0x42,
            Self::Number => 0x43,
            Self::Prevrandao => 0x44,
            Self::GasLimit => 0x45,
            Self::ChainId => 0x46,
            Self::SelfBalance => 0x47,
            Self::BaseFee => 0x48,
            Self::Pop => 0x50,
            Self::MLoad => 0x51,
            Self::MStore => 0x52,
            Self::MStore8 => 0x53,
            Self::SLoad => 0x54,
            Self::SStore => 0x55,
            Self::Jump => 0x56,
            Self::JumpI => 0x57,
            Self::PC => 0x58,
            Self::MSize => 0x59,
            Self::Gas => 0x5a,
            Self::JumpDest => 0x5b,
            Self::Push { size, .. } => PUSH_OPCODE_BASE_VALUE + size,
            Self::Dup(n) => DUP_OPCODE_BASE_VALUE + n,
            Self::Swap(n) => SWAP_OPCODE_BASE_VALUE + n,
            Self::Log(n) => LOG_OPCODE_BASE_VALUE + n,
            Self::Create => 0xf0,
            Self::Call => 0xf1,
            Self::CallCode => 0xf2,
            Self::Return => 0xf3,
            Self::DelegateCall => 0xf4,
            Self::Create2 => 0xf5,
            Self::StaticCall => 0xfa,
            Self::Revert => 0xfd,
            Self::Invalid(byte) => *byte,
            Self::SelfDestruct => 0xff,
        }
    }

    /// Gets the mnemonic of the opcode.
    #[must_use]
    pub fn as_text_code(&self) -> String {
        match self {
            Self::Push { size, .. } => format!("PUSH{size}"),
            Self::Dup(n) => format!("DUP{n}"),
            Self::Swap(n) => format!("SWAP{n}"),
            Self::Log(n) => format!("LOG{n}"),
            Self::Invalid(byte) => format!("INVALID({byte:#04x})"),
            Self::Sha3 => "KECCAK256".into(),
            Self::Prevrandao => "PREVRANDAO".into(),
            other => format!("{other:?}").to_uppercase(),
        }
    }

    /// Gets the number of arguments that the opcode takes from the stack.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        match self {
            Self::Stop
            | Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::Prevrandao
            | Self::GasLimit
            | Self::ChainId
            | Self::SelfBalance
            | Self::BaseFee
            | Self::PC
            | Self::MSize
            | Self::Gas
            | Self::JumpDest
            | Self::Push { .. }
            | Self::Invalid(_)
            | Self::Nop => 0,
            Self::IsZero
            | Self::Not
            | Self::Balance
            | Self::CallDataLoad
            | Self::ExtCodeSize
            | Self::ExtCodeHash
            | Self::BlockHash
            | Self::Pop
            | Self::MLoad
            | Self::SLoad
            | Self::Jump
            | Self::SelfDestruct => 1,
            Self::Add
            | Self::Mul
            | Self::Sub
            | Self::Div
            | Self::SDiv
            | Self::Mod
            | Self::SMod
            | Self::Exp
            | Self::SignExtend
            | Self::Lt
            | Self::Gt
            | Self::SLt
            | Self::SGt
            | Self::Eq
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Byte
            | Self::Shl
            | Self::Shr
            | Self::Sar
            | Self::Sha3
            | Self::MStore
            | Self::MStore8
            | Self::SStore
            | Self::JumpI
            | Self::Return
            | Self::Revert => 2,
            Self::AddMod
            | Self::MulMod
            | Self::CallDataCopy
            | Self::CodeCopy
            | Self::ReturnDataCopy
            | Self::Create => 3,
            Self::ExtCodeCopy | Self::Create2 => 4,
            Self::DelegateCall | Self::StaticCall => 6,
            Self::Call | Self::CallCode => 7,
            Self::Dup(n) => usize::from(*n),
            Self::Swap(n) => usize::from(*n) + 1,
            Self::Log(n) => usize::from(*n) + 2,
        }
    }

    /// Gets the static part of the opcode's gas cost.
    ///
    /// Costs that depend on the arguments, such as memory expansion, are
    /// charged separately by the interpreter.
    #[must_use]
    pub fn min_gas_cost(&self) -> u64 {
        match self {
            Self::Stop | Self::Return | Self::Revert | Self::Invalid(_) | Self::Nop => 0,
            Self::JumpDest => 1,
            Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::Prevrandao
            | Self::GasLimit
            | Self::ChainId
            | Self::BaseFee
            | Self::Pop
            | Self::PC
            | Self::MSize
            | Self::Gas
            | Self::Push { size: 0, .. } => 2,
            Self::Add
            | Self::Sub
            | Self::Not
            | Self::Lt
            | Self::Gt
            | Self::SLt
            | Self::SGt
            | Self::Eq
            | Self::IsZero
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Byte
            | Self::Shl
            | Self::Shr
            | Self::Sar
            | Self::CallDataLoad
            | Self::CallDataCopy
            | Self::CodeCopy
            | Self::ReturnDataCopy
            | Self::MLoad
            | Self::MStore
            | Self::MStore8
            | Self::Push { .. }
            | Self::Dup(_)
            | Self::Swap(_) => 3,
            Self::Mul
            | Self::Div
            | Self::SDiv
            | Self::Mod
            | Self::SMod
            | Self::SignExtend
            | Self::SelfBalance => 5,
            Self::AddMod | Self::MulMod | Self::Jump => 8,
            Self::JumpI | Self::Exp => 10,
            Self::BlockHash => 20,
            Self::Sha3 => 30,
            Self::Balance
            | Self::ExtCodeSize
            | Self::ExtCodeCopy
            | Self::ExtCodeHash
            | Self::SLoad
            | Self::SStore
            | Self::Call
            | Self::CallCode
            | Self::DelegateCall
            | Self::StaticCall => 100,
            Self::Log(n) => 375 + 375 * u64::from(*n),
            Self::SelfDestruct => 5_000,
            Self::Create | Self::Create2 => 32_000,
        }
    }

    /// Checks if the opcode may modify state, and hence cannot execute in a
    /// static context.
    #[must_use]
    pub fn writes_state(&self) -> bool {
        matches!(
            self,
            Self::SStore | Self::Log(_) | Self::Create | Self::Create2 | Self::SelfDestruct
        )
    }

    /// Encodes the opcode, including the data of a push, into bytes.
    ///
    /// [`Opcode::Nop`] encodes to nothing.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Nop => Vec::new(),
            Self::Push { size, value } => {
                let mut bytes = vec![self.as_byte()];
                let data = value.to_be_bytes();
                bytes.extend_from_slice(&data[32 - usize::from(*size)..]);
                bytes
            }
            other => vec![other.as_byte()],
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push { size, value } if *size > 0 => write!(f, "PUSH{size} {value:#x}"),
            other => write!(f, "{}", other.as_text_code()),
        }
    }
}
