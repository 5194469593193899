//! This module contains errors pertaining to the symbolic execution of the
//! bytecode.
//!
//! Contract-defined abnormal termination (reverts, invalid opcodes, running out
//! of gas, and so on) is _not_ an error here. It is recorded as the outcome of
//! the path that hit it. The errors in this module are engine faults: a broken
//! invariant inside the engine itself, which aborts the whole run.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::error::{container, expression};

/// Engine faults that occur while stepping an
/// [`crate::vm::state::ExecutionState`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Expression(#[from] expression::Error),

    #[error("Attempted to step a state that has already terminated with {outcome}")]
    StepOnTerminalState { outcome: String },

    #[error("A worker thread panicked while stepping a state")]
    WorkerPanicked,
}

/// An execution error with an associated location in the bytecode.
pub type LocatedError = container::Located<Error>;

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, instruction_pointer: u32) -> Self::Located {
        container::Located {
            location: instruction_pointer,
            payload:  self,
        }
    }
}

/// An engine fault together with a dump of the state that was being stepped
/// when it occurred.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct FaultReport {
    /// The fault itself.
    pub error: LocatedError,

    /// A human-readable rendering of the state at the time of the fault.
    pub state_dump: String,
}

impl FaultReport {
    /// Constructs a new fault report for `error`, dumping `state` with its
    /// alternate debug representation.
    #[must_use]
    pub fn new(error: LocatedError, state: &impl std::fmt::Debug) -> Self {
        let state_dump = format!("{state:#?}");
        Self { error, state_dump }
    }
}

impl Display for FaultReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Engine fault {}", self.error)?;
        write!(f, "{}", self.state_dump)
    }
}
