//! This module contains the definition of the virtual machine's memory.

use std::collections::BTreeMap;

use crate::{
    constant::{BYTE_SIZE_BITS, WORD_SIZE_BYTES},
    error::expression::Result,
    expr::SymbolicValue,
    vm::outcome::ExceptionKind,
};

/// A representation of the transient memory of the symbolic virtual machine.
///
/// Memory is byte-addressed at concrete offsets, with each cell holding a
/// byte-wide symbolic value. Words are split into their bytes when stored and
/// concatenated back together when loaded, which the expression simplifier
/// folds back into the original word when the bytes line up.
///
/// Cells that have never been written read as zero. The active size of the
/// memory grows in whole words as it is touched, and is what `MSIZE` reports
/// and memory expansion gas is charged against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Memory {
    cells: BTreeMap<usize, SymbolicValue>,
    words: usize,
    limit: usize,
}

impl Memory {
    /// Constructs a new memory that may grow to at most `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            cells: BTreeMap::new(),
            words: 0,
            limit,
        }
    }

    /// Gets the active size of the memory in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.words * WORD_SIZE_BYTES
    }

    /// Grows the active size of the memory to cover `size` bytes from
    /// `offset`, returning the gas that the expansion costs.
    ///
    /// Accessing zero bytes never expands the memory, whatever the offset.
    ///
    /// # Errors
    ///
    /// If the access would grow the memory past its limit.
    pub fn expand(&mut self, offset: usize, size: usize) -> std::result::Result<u64, ExceptionKind> {
        if size == 0 {
            return Ok(0);
        }
        let end = offset.checked_add(size).ok_or(ExceptionKind::MemoryLimit)?;
        if end > self.limit {
            return Err(ExceptionKind::MemoryLimit);
        }
        let words = end.div_ceil(WORD_SIZE_BYTES);
        if words <= self.words {
            return Ok(0);
        }
        let cost = expansion_cost(words).saturating_sub(expansion_cost(self.words));
        self.words = words;
        Ok(cost)
    }

    /// Reads the byte at `offset`.
    #[must_use]
    pub fn read_byte(&self, offset: usize) -> SymbolicValue {
        self.cells
            .get(&offset)
            .cloned()
            .unwrap_or_else(|| SymbolicValue::constant(0u8, BYTE_SIZE_BITS))
    }

    /// Reads `size` bytes starting at `offset`.
    #[must_use]
    pub fn read(&self, offset: usize, size: usize) -> Vec<SymbolicValue> {
        (offset..offset + size).map(|o| self.read_byte(o)).collect()
    }

    /// Loads the word starting at `offset`, with the byte at `offset` in the
    /// most significant position.
    ///
    /// # Errors
    ///
    /// Never for memory built through this interface, but width errors are
    /// propagated.
    pub fn load_word(&self, offset: usize) -> Result<SymbolicValue> {
        SymbolicValue::concat(self.read(offset, WORD_SIZE_BYTES))
    }

    /// Writes the byte-wide `value` at `offset`.
    pub fn write_byte(&mut self, offset: usize, value: SymbolicValue) {
        debug_assert_eq!(value.width(), BYTE_SIZE_BITS);
        self.cells.insert(offset, value);
    }

    /// Writes `bytes` in order starting at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[SymbolicValue]) {
        for (index, byte) in bytes.iter().enumerate() {
            self.write_byte(offset + index, byte.clone());
        }
    }

    /// Stores the word `value` starting at `offset`, most significant byte
    /// first.
    ///
    /// # Errors
    ///
    /// If `value` is not a full word.
    pub fn store_word(&mut self, offset: usize, value: &SymbolicValue) -> Result<()> {
        for index in 0..WORD_SIZE_BYTES {
            self.write_byte(offset + index, value.byte_at(index)?);
        }
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(crate::constant::MAX_MEMORY_SIZE_BYTES)
    }
}

/// Computes the total gas paid for a memory of `words` words.
fn expansion_cost(words: usize) -> u64 {
    let words = u64::try_from(words).unwrap_or(u64::MAX);
    words
        .saturating_mul(3)
        .saturating_add(words.saturating_mul(words) / 512)
}
