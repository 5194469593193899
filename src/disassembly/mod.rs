//! This module contains the implementation of the [`Program`], the decoded
//! form of a contract's code that the interpreter executes.

mod disassembler;

use bitvec::vec::BitVec;
use derivative::Derivative;
use hex::FromHexError;
use sha3::{Digest, Keccak256};

use crate::{
    error::{container::Locatable, disassembly, disassembly::Error},
    opcode::Opcode,
};

/// A contract's code, decoded once into a table of instructions indexed by
/// byte offset.
///
/// # Byte-Instruction Correspondence
///
/// Where most opcodes occupy a single byte, `PUSHN` is followed in the code by
/// the `N` bytes of data that it pushes. The table keeps the correspondence of
/// offsets to instructions by filling those slots with [`Opcode::Nop`], so
/// that the program counter is always a byte offset.
///
/// # Jump Destinations
///
/// A jump is valid exactly when its target decodes to [`Opcode::JumpDest`].
/// Bytes inside push data that happen to equal `0x5b` are `Nop`s in the table,
/// so they are correctly rejected.
///
/// # Empty Programs
///
/// Accounts without code have the empty program. Executing it stops
/// immediately, as reading past the end of any program yields `STOP`.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Program {
    #[derivative(Debug(format_with = "format_len"))]
    bytes: Vec<u8>,

    #[derivative(Debug = "ignore")]
    instructions: Vec<Opcode>,

    #[derivative(Debug = "ignore")]
    jump_destinations: BitVec,

    #[derivative(Debug(format_with = "format_hash"))]
    code_hash: [u8; 32],
}

impl Program {
    /// Decodes `bytes` into a program.
    ///
    /// # Errors
    ///
    /// If the bytes are too large to be addressed.
    pub fn new(bytes: impl Into<Vec<u8>>) -> disassembly::Result<Self> {
        let bytes = bytes.into();
        let instructions = disassembler::disassemble(&bytes)?;
        let mut jump_destinations = BitVec::repeat(false, instructions.len());
        for (offset, opcode) in instructions.iter().enumerate() {
            if *opcode == Opcode::JumpDest {
                jump_destinations.set(offset, true);
            }
        }
        let code_hash = Keccak256::digest(&bytes).into();

        Ok(Self {
            bytes,
            instructions,
            jump_destinations,
            code_hash,
        })
    }

    /// Constructs the empty program.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bytes:             Vec::new(),
            instructions:      Vec::new(),
            jump_destinations: BitVec::new(),
            code_hash:         Keccak256::digest(b"").into(),
        }
    }

    /// Decodes a program from its hexadecimal encoding, with or without a
    /// leading `0x`.
    ///
    /// # Errors
    ///
    /// If the string is not valid hex, or the program is too large.
    pub fn from_hex(value: &str) -> disassembly::Result<Self> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        let bytes = match hex::decode(stripped) {
            Ok(b) => b,
            Err(e) => {
                let locate =
                    |val| u32::try_from(val).map_err(|_| Error::BytecodeTooLarge.locate(u32::MAX));

                let error = if let FromHexError::InvalidHexCharacter { c, index } = e {
                    let location = locate(index);
                    Error::InvalidHexCharacter(c, index).locate(location?)
                } else {
                    let location = locate(stripped.len());
                    Error::InvalidHexLength.locate(location?)
                };

                return Err(error);
            }
        };
        Self::new(bytes)
    }

    /// Gets the raw bytes of the program.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Gets the length of the program in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Checks if the program has no code.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Gets the instruction at byte `offset`.
    ///
    /// Offsets past the end of the program read as [`Opcode::Stop`].
    #[must_use]
    pub fn instruction(&self, offset: usize) -> Opcode {
        self.instructions.get(offset).copied().unwrap_or(Opcode::Stop)
    }

    /// Iterates over the instructions of the program with their offsets,
    /// skipping the filler for push data.
    pub fn instructions(&self) -> impl Iterator<Item = (usize, Opcode)> + '_ {
        self.instructions
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, op)| *op != Opcode::Nop)
    }

    /// Checks if `offset` is a valid jump destination.
    #[must_use]
    pub fn is_jump_destination(&self, offset: usize) -> bool {
        self.jump_destinations.get(offset).is_some_and(|b| *b)
    }

    /// Gets the Keccak-256 hash of the program's bytes.
    #[must_use]
    pub fn code_hash(&self) -> [u8; 32] {
        self.code_hash
    }

    /// Gets the byte at `offset`, reading zero past the end of the program.
    #[must_use]
    pub fn byte(&self, offset: usize) -> u8 {
        self.bytes.get(offset).copied().unwrap_or(0)
    }
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Program {}

impl Default for Program {
    fn default() -> Self {
        Self::empty()
    }
}

/// A [`Program`] can be decoded from a byte array of bytecode.
impl<'a> TryFrom<&'a [u8]> for Program {
    type Error = disassembly::LocatedError;

    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// A [`Program`] can be created from a string as long as that string is a
/// hexadecimal encoding of the equivalent bytes.
impl TryFrom<&str> for Program {
    type Error = disassembly::LocatedError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_hex(value)
    }
}

#[allow(clippy::ptr_arg)] // The signature is dictated by `derivative`
fn format_len(bytes: &Vec<u8>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<{} bytes>", bytes.len())
}

fn format_hash(hash: &[u8; 32], f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "0x{}", hex::encode(hash))
}

#[cfg(test)]
mod test {
    use crate::{
        constant::{DUP_OPCODE_BASE_VALUE, LOG_OPCODE_BASE_VALUE, SWAP_OPCODE_BASE_VALUE},
        disassembly::Program,
        error::disassembly,
        opcode::Opcode,
    };

    /// Re-encodes the instructions of `program` into bytes.
    fn reencode(program: &Program) -> Vec<u8> {
        program.instructions().flat_map(|(_, op)| op.encode()).collect()
    }

    #[test]
    fn can_parse_from_bytes() -> anyhow::Result<()> {
        let bytes = util::get_non_consolidated_opcode_bytes();
        let program = Program::try_from(bytes.as_slice())?;

        assert_eq!(program.len(), bytes.len());
        assert_eq!(reencode(&program), bytes);

        Ok(())
    }

    #[test]
    fn can_parse_from_hex_stream() -> anyhow::Result<()> {
        let bytes = util::get_non_consolidated_opcode_bytes();
        let hex_string = format!("0x{}", hex::encode(bytes.as_slice()));
        let program = Program::try_from(hex_string.as_str())?;

        assert_eq!(program.bytes(), bytes.as_slice());

        Ok(())
    }

    #[test]
    fn emits_parse_error_on_incorrectly_encoded_hex_string() {
        let result = Program::try_from("ab70anx7302842").expect_err("Parsing did not error");

        assert_eq!(result.location, 5);
        assert_eq!(
            result.payload,
            disassembly::Error::InvalidHexCharacter('n', 5)
        );
    }

    #[test]
    fn emits_parse_error_on_hex_string_with_bad_length() {
        let bad_length = "ab21fe9b5";
        let result = Program::try_from(bad_length).expect_err("Parsing did not error");

        assert_eq!(result.location, u32::try_from(bad_length.len()).unwrap());
        assert_eq!(result.payload, disassembly::Error::InvalidHexLength);
    }

    #[test]
    fn empty_programs_stop() {
        let program = Program::empty();
        assert!(program.is_empty());
        assert_eq!(program.instruction(0), Opcode::Stop);
        assert!(!program.is_jump_destination(0));
    }

    #[test]
    fn can_parse_push_opcode() -> anyhow::Result<()> {
        let bytes = util::get_valid_push_opcodes(1..=32)?;
        let program = Program::new(bytes.clone())?;

        assert_eq!(program.len(), bytes.len());
        assert_eq!(reencode(&program), bytes);
        assert_eq!(program.instruction(1), Opcode::Nop);

        Ok(())
    }

    #[test]
    fn can_parse_dup_swap_and_log_opcodes() -> anyhow::Result<()> {
        let mut bytes: Vec<u8> = vec![];
        for x in 1..=16 {
            bytes.push(DUP_OPCODE_BASE_VALUE + x);
            bytes.push(SWAP_OPCODE_BASE_VALUE + x);
        }
        for x in 0..=4 {
            bytes.push(LOG_OPCODE_BASE_VALUE + x);
        }
        let program = Program::new(bytes.clone())?;

        assert_eq!(reencode(&program), bytes);
        assert_eq!(program.instruction(0), Opcode::Dup(1));
        assert_eq!(program.instruction(31), Opcode::Swap(16));

        Ok(())
    }

    #[test]
    fn only_real_jumpdests_are_jump_destinations() -> anyhow::Result<()> {
        // PUSH1 0x5b JUMPDEST
        let program = Program::new(vec![0x60, 0x5b, 0x5b])?;
        assert!(!program.is_jump_destination(1));
        assert!(program.is_jump_destination(2));
        assert!(!program.is_jump_destination(3));

        Ok(())
    }

    /// Utilities for writing the tests.
    mod util {
        use std::ops::RangeInclusive;

        use anyhow::anyhow;

        use crate::constant::PUSH_OPCODE_BASE_VALUE;

        /// Provides the bytes corresponding to all of the non-consolidated
        /// opcodes.
        pub fn get_non_consolidated_opcode_bytes() -> Vec<u8> {
            vec![
                0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x10, 0x11,
                0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x20, 0x30,
                0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e,
                0x3f, 0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x50, 0x51, 0x52, 0x53,
                0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x5b, 0x5f, 0xf0, 0xf1, 0xf2, 0xf3, 0xf4,
                0xf5, 0xfa, 0xfd, 0xfe, 0xff,
            ]
        }

        /// Creates a valid set of push opcodes (with random data to be pushed
        /// encoded after them) for the provided range.
        ///
        /// # Errors
        ///
        /// If the range is outside 1..=32.
        pub fn get_valid_push_opcodes(range: RangeInclusive<u8>) -> anyhow::Result<Vec<u8>> {
            if *range.start() < 1 || *range.end() > 32 {
                return Err(anyhow!("Invalid range of sizes for push opcodes"));
            }
            let mut bytes: Vec<u8> = vec![];

            for size in range {
                bytes.push(PUSH_OPCODE_BASE_VALUE + size);
                for _ in 0..size {
                    bytes.push(rand::random());
                }
            }

            Ok(bytes)
        }
    }
}
