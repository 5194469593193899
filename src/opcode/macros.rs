//! This module contains useful macros for working with bytecode and opcodes.

/// Constructs a bytecode input from the input instructions as literal opcodes.
///
/// # Usage
///
/// ```
/// use evm_path_explorer::{bytecode, opcode::Opcode};
///
/// let bytes = bytecode![
///     Opcode::push_value(3u8),
///     Opcode::Jump,
///     Opcode::JumpDest,
///     Opcode::Stop,
/// ];
///
/// let mut expected: Vec<u8> = vec![];
/// expected.extend(Opcode::push_value(3u8).encode());
/// expected.extend(Opcode::Jump.encode());
/// expected.extend(Opcode::JumpDest.encode());
/// expected.extend(Opcode::Stop.encode());
///
/// assert_eq!(bytes, expected);
/// assert_eq!(bytes, vec![0x60, 0x03, 0x56, 0x5b, 0x00]);
/// ```
#[macro_export]
macro_rules! bytecode {
    ($($op:expr),*$(,)?) => {{
        let mut vec: Vec<u8> = vec![];
        $(vec.extend($crate::opcode::Opcode::encode(&$op));)*
        vec
    }};
}

// Export it scoped
pub use bytecode;
