//! This module contains errors pertaining to the constraint solver.

use thiserror::Error;

use crate::solver::UnknownReason;

/// Errors that occur when the solver is asked for something it cannot
/// provide.
///
/// Note that an undecided satisfiability query is _not_ an error. It is
/// reported as [`crate::solver::SatResult::Unknown`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Cannot produce a model for an unsatisfiable path condition")]
    Unsatisfiable,

    #[error("Cannot produce a model as the solver could not decide the query: {_0}")]
    Undecided(UnknownReason),

    #[error("The external solver failed: {_0}")]
    Process(String),

    #[error("Could not parse the solver output: {_0}")]
    MalformedOutput(String),
}

/// The result type for solver operations that can fail.
pub type Result<T> = std::result::Result<T, Error>;
