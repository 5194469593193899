//! This module contains the primary error type for the engine's interface. It
//! also re-exports the more specific error types that are subsystem-specific.

pub mod container;
pub mod disassembly;
pub mod execution;
pub mod explorer;
pub mod expression;
pub mod harness;
pub mod solver;

use thiserror::Error;

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the more-specific
/// child error types as appropriate.
pub type Result<T> = std::result::Result<T, Error>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by the
/// clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors that come from decoding or assembling bytecode.
    #[error(transparent)]
    Disassembly(#[from] disassembly::LocatedError),

    /// Engine faults raised while exploring, with the offending state.
    #[error(transparent)]
    Fault(#[from] Box<execution::FaultReport>),

    /// Errors from building symbolic expressions outside of execution.
    #[error(transparent)]
    Expression(#[from] expression::Error),

    /// Errors from setting up an exploration.
    #[error(transparent)]
    Explorer(#[from] explorer::Error),

    /// Errors from the solver subsystem.
    #[error(transparent)]
    Solver(#[from] solver::Error),

    /// Errors from the transaction harness.
    #[error(transparent)]
    Harness(#[from] harness::Error),
}

impl Error {
    /// Checks if this error is an engine fault.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl From<execution::FaultReport> for Error {
    fn from(value: execution::FaultReport) -> Self {
        Self::Fault(Box::new(value))
    }
}
