//! This module contains errors pertaining to configuring an exploration.

use thiserror::Error;

/// Errors that occur when an exploration is set up in a way that cannot
/// terminate, or its results are queried for something they do not hold.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("A termination policy needs at least one of a step, state or time bound")]
    Unbounded,

    #[error("A termination policy needs at least one worker")]
    NoWorkers,

    #[error("The campaign has no terminal state at index {_0}")]
    NoSuchState(usize),
}

/// The result type for exploration setup.
pub type Result<T> = std::result::Result<T, Error>;
