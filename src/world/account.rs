//! This module contains the representation of a single account in the world
//! state, including its symbolic storage.

use std::sync::Arc;

use crate::{
    disassembly::Program,
    error::expression::Result,
    expr::{Operator, SymbolicValue},
};

/// The storage of an account, kept as a log of writes.
///
/// Keys and values are both symbolic words. Writing a key that is
/// structurally equal to an earlier key replaces that entry, so the log holds
/// at most one entry per distinct key expression, ordered from oldest to
/// newest write.
#[derive(Clone, Debug, Default)]
pub struct Storage {
    writes: Arc<Vec<(SymbolicValue, SymbolicValue)>>,
}

impl Storage {
    /// Reads the value at `key`.
    ///
    /// Keys never written read as zero. When the key is symbolic, or any key
    /// written before it is, the result is a chain of `ite` expressions over
    /// every write that may alias `key`, newest first.
    ///
    /// # Errors
    ///
    /// If the key is not a word.
    pub fn read(&self, key: &SymbolicValue) -> Result<SymbolicValue> {
        let mut aliases = Vec::new();
        let mut base = SymbolicValue::word(0u8);
        for (written, value) in self.writes.iter().rev() {
            if written == key {
                base = value.clone();
                break;
            }
            if written.is_concrete() && key.is_concrete() {
                continue;
            }
            aliases.push((written, value));
        }

        let mut result = base;
        for (written, value) in aliases.into_iter().rev() {
            let same = SymbolicValue::apply(Operator::Eq, vec![key.clone(), written.clone()])?;
            result = SymbolicValue::ite(same, value.clone(), result)?;
        }
        Ok(result)
    }

    /// Constructs the storage after writing `value` at `key`.
    #[must_use]
    pub fn write(&self, key: SymbolicValue, value: SymbolicValue) -> Self {
        let mut writes: Vec<_> = self.writes.iter().filter(|(k, _)| *k != key).cloned().collect();
        writes.push((key, value));
        Self {
            writes: Arc::new(writes),
        }
    }

    /// Iterates over the entries of the storage from oldest to newest write.
    pub fn entries(&self) -> impl Iterator<Item = &(SymbolicValue, SymbolicValue)> {
        self.writes.iter()
    }

    /// Gets the number of distinct keys written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Checks if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// An account in the world state.
///
/// Accounts are immutable. The world state replaces an account wholesale when
/// writing to it, and the untouched accounts keep being shared between
/// versions.
#[derive(Clone, Debug)]
pub struct Account {
    pub(crate) balance: SymbolicValue,
    pub(crate) nonce:   u64,
    pub(crate) code:    Arc<Program>,
    pub(crate) storage: Storage,
}

impl Account {
    /// Constructs a new account without code holding `balance`.
    #[must_use]
    pub fn new(balance: SymbolicValue) -> Self {
        Self {
            balance,
            nonce: 0,
            code: Arc::new(Program::empty()),
            storage: Storage::default(),
        }
    }

    /// Gets the account's balance.
    #[must_use]
    pub fn balance(&self) -> &SymbolicValue {
        &self.balance
    }

    /// Gets the account's nonce.
    #[must_use]
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Gets the account's code.
    #[must_use]
    pub fn code(&self) -> &Arc<Program> {
        &self.code
    }

    /// Gets the account's storage.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Checks if the account has code.
    #[must_use]
    pub fn is_contract(&self) -> bool {
        !self.code.is_empty()
    }
}
