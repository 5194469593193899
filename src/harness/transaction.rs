//! This module contains the transactions that the harness runs, and the
//! handles it gives out for the accounts, contracts and transactions it knows
//! about.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use crate::{
    disassembly::Program,
    expr::SymbolicValue,
    vm::state::{TransactionKind, TransactionRecord},
    world::Address,
};

/// A handle to an externally owned account created by the harness.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AccountHandle {
    address: Address,
}

impl AccountHandle {
    pub(crate) fn new(address: Address) -> Self {
        Self { address }
    }

    /// Gets the address of the account.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }
}

/// A handle to a contract deployed by the harness.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContractHandle {
    address: Address,
}

impl ContractHandle {
    pub(crate) fn new(address: Address) -> Self {
        Self { address }
    }

    /// Gets the address the contract was deployed at.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }
}

/// A handle to a transaction that has been queued but not yet run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PendingExecution {
    /// The position of the transaction among those the engine has queued.
    pub sequence: usize,

    /// The account the transaction is sent to.
    pub target: Address,
}

/// A transaction to be run from every ready state.
///
/// Its calldata and value may be symbolic. Its preconditions are added to the
/// path condition of every state that runs it, and states in which they cannot
/// hold do not run it at all.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub(crate) kind:          TransactionKind,
    pub(crate) caller:        Address,
    pub(crate) target:        Address,
    pub(crate) calldata:      Vec<SymbolicValue>,
    pub(crate) value:         SymbolicValue,
    pub(crate) function:      Option<String>,
    pub(crate) preconditions: Vec<SymbolicValue>,

    /// The creation code, for deployments.
    pub(crate) init_code: Option<Arc<Program>>,
}

impl Transaction {
    /// Constructs a call from `caller` to `target` with `calldata` and no
    /// value.
    #[must_use]
    pub fn call(caller: Address, target: Address, calldata: Vec<SymbolicValue>) -> Self {
        Self {
            kind: TransactionKind::Call,
            caller,
            target,
            calldata,
            value: SymbolicValue::word(0u8),
            function: None,
            preconditions: Vec::new(),
            init_code: None,
        }
    }

    /// Constructs the deployment of `init_code` by `caller` to `target`.
    pub(crate) fn deploy(
        caller: Address,
        target: Address,
        init_code: Arc<Program>,
        value: SymbolicValue,
    ) -> Self {
        Self {
            kind: TransactionKind::Deploy,
            calldata: Vec::new(),
            value,
            init_code: Some(init_code),
            ..Self::call(caller, target, Vec::new())
        }
    }

    /// Sets the value sent with the transaction.
    #[must_use]
    pub fn with_value(mut self, value: SymbolicValue) -> Self {
        self.value = value;
        self
    }

    /// Names the function the transaction calls, for reporting.
    #[must_use]
    pub fn with_function(mut self, signature: impl Into<String>) -> Self {
        self.function = Some(signature.into());
        self
    }

    /// Adds a precondition that must hold for the transaction to run.
    #[must_use]
    pub fn requiring(mut self, precondition: SymbolicValue) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// Gets the account that sends the transaction.
    #[must_use]
    pub fn caller(&self) -> Address {
        self.caller
    }

    /// Gets the account the transaction is sent to.
    #[must_use]
    pub fn target(&self) -> Address {
        self.target
    }

    /// Gets the value sent with the transaction.
    #[must_use]
    pub fn value(&self) -> &SymbolicValue {
        &self.value
    }

    /// Gets the preconditions of the transaction.
    #[must_use]
    pub fn preconditions(&self) -> &[SymbolicValue] {
        &self.preconditions
    }

    /// Builds the record kept of the transaction by the states that run it.
    pub(crate) fn record(&self) -> TransactionRecord {
        TransactionRecord {
            kind:     self.kind,
            caller:   self.caller,
            target:   self.target,
            calldata: self.calldata.clone(),
            value:    self.value.clone(),
            function: self.function.clone(),
        }
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let action = match self.kind {
            TransactionKind::Deploy => "deploy",
            TransactionKind::Call => "call",
        };
        write!(f, "{action} {} -> {}", self.caller, self.target)?;
        if let Some(function) = &self.function {
            write!(f, " {function}")?;
        }
        Ok(())
    }
}
