//! This module contains errors raised when building symbolic expressions.
//!
//! These only ever indicate a bug in the code that builds the expression, and
//! are hence treated as engine faults when they surface during execution.

use thiserror::Error;

use crate::expr::{Operator, Width};

/// Errors that occur when applying an [`Operator`] to operands that it cannot
/// accept.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Operator {operator} expected operands of width {expected} but found width {found}")]
    WidthMismatch {
        operator: Operator,
        expected: Width,
        found:    Width,
    },

    #[error("Operator {operator} expected {expected} operands but was given {found}")]
    ArityMismatch {
        operator: Operator,
        expected: usize,
        found:    usize,
    },

    #[error("Width {width} is not valid for operator {operator}")]
    InvalidWidth { operator: Operator, width: Width },
}

/// The result type for operations that construct expressions.
pub type Result<T> = std::result::Result<T, Error>;
