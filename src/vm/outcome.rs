//! This module contains the ways in which an execution path can end.

use std::fmt::{Display, Formatter};

use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::{
    constant::{INVALID_OPCODE_BYTE, SOLIDITY_ASSERTION_PANIC_CODE, SOLIDITY_PANIC_SELECTOR},
    expr::SymbolicValue,
    world::Address,
};

/// The reasons for a frame to end abnormally.
///
/// These are properties of the contract being executed, not of the engine, and
/// are recorded as the outcome of the path rather than raised as errors.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum ExceptionKind {
    StackUnderflow,
    StackOverflow,

    /// An undefined instruction was executed, carrying its byte.
    InvalidOpcode(u8),

    /// A jump targeted something other than a `JUMPDEST`.
    InvalidJump,

    OutOfGas,

    /// A state-changing instruction was executed in a static context.
    StaticStateChange,

    /// `RETURNDATACOPY` read past the end of the return data.
    ReturnDataOutOfBounds,

    /// A creation returned more code than a contract may hold.
    CodeSizeExceeded,

    /// A jump target depended on symbolic input.
    SymbolicJumpTarget,

    /// A memory, calldata or code offset or size depended on symbolic input.
    SymbolicOffset,

    /// Code to be deployed depended on symbolic input.
    SymbolicCode,

    /// An account address depended on symbolic input.
    SymbolicAddress,

    /// Memory grew past the configured limit.
    MemoryLimit,

    /// A call or create would have exceeded the configured call depth.
    CallDepthExceeded,
}

impl ExceptionKind {
    /// Checks if the exception ends the whole path rather than just the
    /// current frame.
    ///
    /// Exceptions that stem from the limits of the engine, rather than from
    /// the contract, cannot be handed back to a calling frame as an ordinary
    /// failed call without making up a result, so they end the path.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfGas
                | Self::SymbolicJumpTarget
                | Self::SymbolicOffset
                | Self::SymbolicCode
                | Self::SymbolicAddress
                | Self::MemoryLimit
                | Self::CallDepthExceeded
        )
    }
}

impl Display for ExceptionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOpcode(byte) => write!(f, "invalid opcode {byte:#04x}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl std::error::Error for ExceptionKind {}

/// The outcome of a frame or a whole execution path.
///
/// Returned and reverted data is kept as a sequence of byte-wide symbolic
/// values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Normal termination through `RETURN`, `STOP` or `SELFDESTRUCT`.
    Return { data: Vec<SymbolicValue> },

    /// Termination through `REVERT`.
    Revert { data: Vec<SymbolicValue> },

    /// Abnormal termination.
    Exception { kind: ExceptionKind },
}

impl Outcome {
    /// Constructs the outcome of `STOP`.
    #[must_use]
    pub fn stop() -> Self {
        Self::Return { data: Vec::new() }
    }

    /// Gets the kind of the outcome.
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Return { .. } => OutcomeKind::Return,
            Self::Revert { .. } => OutcomeKind::Revert,
            Self::Exception { .. } => OutcomeKind::Exception,
        }
    }

    /// Checks if the outcome is a successful one.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Return { .. })
    }

    /// Gets the returned or reverted data.
    #[must_use]
    pub fn data(&self) -> &[SymbolicValue] {
        match self {
            Self::Return { data } | Self::Revert { data } => data,
            Self::Exception { .. } => &[],
        }
    }

    /// Gets the exception that ended the frame, if it ended in one.
    #[must_use]
    pub fn exception(&self) -> Option<ExceptionKind> {
        match self {
            Self::Exception { kind } => Some(*kind),
            _ => None,
        }
    }

    /// Checks if the outcome is a failed assertion.
    ///
    /// This is either executing the designated `INVALID` instruction, as
    /// older compilers do for `assert`, or reverting with the Solidity
    /// `Panic(uint256)` error and the assertion panic code.
    #[must_use]
    pub fn is_assertion_failure(&self) -> bool {
        match self {
            Self::Exception {
                kind: ExceptionKind::InvalidOpcode(byte),
            } => *byte == INVALID_OPCODE_BYTE,
            Self::Revert { data } => {
                let concrete: Option<Vec<u8>> = data
                    .iter()
                    .map(|b| b.as_concrete().and_then(|v| u8::try_from(v).ok()))
                    .collect();
                let Some(bytes) = concrete else {
                    return false;
                };
                bytes.len() == 36
                    && bytes[..4] == SOLIDITY_PANIC_SELECTOR
                    && U256::from_be_bytes(bytes[4..].try_into().unwrap_or([0; 32]))
                        == U256::from(SOLIDITY_ASSERTION_PANIC_CODE)
            }
            Self::Exception { .. } | Self::Return { .. } => false,
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Return { data } => write!(f, "RETURN ({} bytes)", data.len()),
            Self::Revert { data } => write!(f, "REVERT ({} bytes)", data.len()),
            Self::Exception { kind } => write!(f, "EXCEPTION ({kind})"),
        }
    }
}

/// The kinds of [`Outcome`], without their data.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum OutcomeKind {
    Return,
    Revert,
    Exception,
}

/// A log entry emitted by one of the `LOG` instructions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Log {
    /// The account that emitted the entry.
    pub address: Address,

    /// The topics of the entry.
    pub topics: Vec<SymbolicValue>,

    /// The data of the entry as byte-wide values.
    pub data: Vec<SymbolicValue>,
}

#[cfg(test)]
mod test {
    use crate::{
        constant::SOLIDITY_PANIC_SELECTOR,
        expr::SymbolicValue,
        vm::outcome::{ExceptionKind, Outcome},
    };

    fn bytes(values: &[u8]) -> Vec<SymbolicValue> {
        values.iter().map(|b| SymbolicValue::constant(*b, 8)).collect()
    }

    #[test]
    fn recognises_assertion_failures() {
        let invalid = Outcome::Exception {
            kind: ExceptionKind::InvalidOpcode(0xfe),
        };
        assert!(invalid.is_assertion_failure());

        let unknown = Outcome::Exception {
            kind: ExceptionKind::InvalidOpcode(0xf9),
        };
        assert!(!unknown.is_assertion_failure());

        for kind in [
            ExceptionKind::StackUnderflow,
            ExceptionKind::OutOfGas,
            ExceptionKind::InvalidJump,
        ] {
            assert!(!Outcome::Exception { kind }.is_assertion_failure());
        }

        let mut panic = SOLIDITY_PANIC_SELECTOR.to_vec();
        panic.extend([0; 31]);
        panic.push(0x01);
        assert!(Outcome::Revert { data: bytes(&panic) }.is_assertion_failure());

        let last = panic.len() - 1;
        panic[last] = 0x11;
        assert!(!Outcome::Revert { data: bytes(&panic) }.is_assertion_failure());
        assert!(!Outcome::stop().is_assertion_failure());
    }

    #[test]
    fn engine_limits_are_fatal() {
        assert!(ExceptionKind::SymbolicJumpTarget.is_fatal());
        assert!(ExceptionKind::CallDepthExceeded.is_fatal());
        assert!(!ExceptionKind::InvalidJump.is_fatal());
        assert!(!ExceptionKind::StackUnderflow.is_fatal());
    }
}
