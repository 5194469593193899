//! This module contains the generic machinery for attaching a bytecode location
//! to an error.

use std::fmt::Formatter;

use thiserror::Error;

/// An error that is localised to a particular byte-offset location in the
/// bytecode.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    /// The byte offset in the bytecode where the error occurred.
    pub location: u32,

    /// The error data
    pub payload: E,
}

impl<E> Located<E>
where
    E: Clone,
{
    /// Re-wraps the payload into the more general error type `T` while keeping
    /// the location.
    #[must_use]
    pub fn widen<T>(self) -> Located<T>
    where
        T: Clone + From<E>,
    {
        Located {
            location: self.location,
            payload:  self.payload.into(),
        }
    }
}

/// Displays the error associated with the hexadecimal-encoded byte offset in
/// the bytecode where the error occurred.
impl<E> std::fmt::Display for Located<E>
where
    E: std::fmt::Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#06x}]: {}", self.location, self.payload)
    }
}

/// A trait for types that can have a byte-offset location attached to them.
pub trait Locatable
where
    Self: Sized,
{
    /// The return type with the attached byte-offset location.
    type Located;

    /// Attach the location described by `instruction_pointer` (a byte offset in
    /// the bytecode) to the error.
    fn locate(self, instruction_pointer: u32) -> Self::Located;
}

/// A blanket implementation that allows for attaching a location to any result.
impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, instruction_pointer: u32) -> Self::Located {
        self.map_err(|e| Located {
            location: instruction_pointer,
            payload:  e,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::error::{
        container::{Locatable, Located},
        disassembly,
        execution,
    };

    #[test]
    fn displays_location_in_hex() {
        let error = disassembly::Error::InvalidPushSize(40).locate(0x1f);
        assert_eq!(
            error.to_string(),
            "[0x001f]: Invalid size 40 provided to the `PUSH` opcode"
        );
    }

    #[test]
    fn can_locate_results() {
        let result: Result<(), execution::Error> = Err(execution::Error::WorkerPanicked);
        let located = result.locate(7);
        assert_eq!(
            located,
            Err(Located {
                location: 7,
                payload:  execution::Error::WorkerPanicked,
            })
        );
    }
}
