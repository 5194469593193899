//! This module contains errors pertaining to setting up and running
//! transactions through the [`crate::harness::Engine`].

use thiserror::Error;

use crate::world::Address;

/// Errors that occur when the driver asks the harness for something that
/// cannot be done.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("No account exists at {_0}")]
    UnknownAccount(Address),

    #[error("The account at {_0} has no code to invoke")]
    NoCode(Address),

    #[error("There are no ready states left to run transactions from")]
    NoReadyStates,

    #[error("The contract has no ABI to resolve function {_0:?} against")]
    MissingAbi(String),

    #[error("No function named {_0:?} exists in the ABI")]
    UnknownFunction(String),

    #[error("The function name {_0:?} is overloaded, use the full signature")]
    AmbiguousFunction(String),

    #[error("Function {function} expects {expected} arguments but {found} were given")]
    ArgumentCount {
        function: String,
        expected: usize,
        found:    usize,
    },

    #[error("Argument {index} of type {expected} cannot be given {found}")]
    ArgumentType {
        index:    usize,
        expected: String,
        found:    String,
    },

    #[error("Constructor arguments become part of the deployed code and cannot be symbolic")]
    SymbolicConstructorArguments,

    #[error("The ABI type {_0:?} is not supported")]
    UnsupportedType(String),

    #[error("Could not parse the ABI: {_0}")]
    InvalidAbi(String),

    #[error("Could not read the compiled contract: {_0}")]
    InvalidArtifact(String),

    #[error("Deploying the contract at {address} had no successful execution path")]
    DeploymentFailed { address: Address },

    #[error("The deployment of a contract ended up at different addresses across ready states")]
    DivergentDeployment,
}

/// The result type for harness operations.
pub type Result<T> = std::result::Result<T, Error>;
