//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]
#![allow(dead_code)] // Not every test uses every utility

use std::sync::Arc;

use ethnum::U256;
use evm_path_explorer::{
    expr::SymbolicValue,
    harness::{
        abi::{selector, Abi},
        contract::Contract,
        creation_code,
        transaction::{AccountHandle, ContractHandle},
        Config,
        Engine,
    },
    opcode::{asm::Assembler, Opcode},
    solver::{self, Solver},
    vm::state::ExecutionState,
    world::Address,
};

/// The ABI of the bank contract built by [`simple_bank`].
pub const SIMPLE_BANK_ABI: &str = r#"[
    {"type": "function", "name": "deposit", "inputs": [], "outputs": [],
     "stateMutability": "payable"},
    {"type": "function", "name": "withdraw",
     "inputs": [{"name": "amount", "type": "uint256"}], "outputs": [],
     "stateMutability": "nonpayable"}
]"#;

/// The balance that [`deployed_bank`] gives its user.
pub const USER_BALANCE: u64 = 1_000;

/// A bank contract that keeps a balance per depositor in the storage slot
/// keyed by their address.
///
/// `deposit()` adds the value sent to the caller's balance, while
/// `withdraw(uint256)` reverts if the caller's balance is less than the amount
/// and subtracts it otherwise. No ether is sent back.
pub fn simple_bank() -> anyhow::Result<Contract> {
    let deposit = u32::from_be_bytes(selector("deposit()"));
    let withdraw = u32::from_be_bytes(selector("withdraw(uint256)"));

    let runtime = Assembler::new()
        // Dispatch on the selector
        .push(0u8)
        .op(Opcode::CallDataLoad)
        .push(224u8)
        .op(Opcode::Shr)
        .op(Opcode::Dup(1))
        .push(deposit)
        .op(Opcode::Eq)
        .push_label("deposit")
        .op(Opcode::JumpI)
        .op(Opcode::Dup(1))
        .push(withdraw)
        .op(Opcode::Eq)
        .push_label("withdraw")
        .op(Opcode::JumpI)
        .push_label("reject")
        .op(Opcode::Jump)
        // balances[caller] += msg.value
        .label("deposit")
        .op(Opcode::Caller)
        .op(Opcode::SLoad)
        .op(Opcode::CallValue)
        .op(Opcode::Add)
        .op(Opcode::Caller)
        .op(Opcode::SStore)
        .op(Opcode::Stop)
        // require(balances[caller] >= amount); balances[caller] -= amount
        .label("withdraw")
        .push(4u8)
        .op(Opcode::CallDataLoad)
        .op(Opcode::Caller)
        .op(Opcode::SLoad)
        .op(Opcode::Dup(2))
        .op(Opcode::Dup(2))
        .op(Opcode::Lt)
        .push_label("reject")
        .op(Opcode::JumpI)
        .op(Opcode::Sub)
        .op(Opcode::Caller)
        .op(Opcode::SStore)
        .op(Opcode::Stop)
        .label("reject")
        .push(0u8)
        .push(0u8)
        .op(Opcode::Revert)
        .assemble()?;

    Ok(Contract::from_bytecode("SimpleBank", creation_code(&runtime))
        .with_abi(Abi::from_json(SIMPLE_BANK_ABI)?))
}

/// Constructs an engine that decides paths without an external solver.
pub fn engine() -> Engine {
    let solver = Arc::new(Solver::builtin_only(solver::Config::default()));
    Engine::with_solver(Config::default(), solver)
}

/// An engine with a funded user and a deployed [`simple_bank`].
pub struct Bank {
    pub engine: Engine,
    pub user:   AccountHandle,
    pub bank:   ContractHandle,
}

/// Sets up an engine holding a user with [`USER_BALANCE`] and a
/// [`simple_bank`] deployed by them.
pub fn deployed_bank() -> anyhow::Result<Bank> {
    let mut engine = engine();
    let user = engine.create_account(SymbolicValue::word(USER_BALANCE))?;
    let bank = engine.deploy_contract(&simple_bank()?, &user, &[], zero())?;
    Ok(Bank { engine, user, bank })
}

/// The zero word, for transactions that send no value.
pub fn zero() -> SymbolicValue {
    SymbolicValue::word(0u8)
}

/// Gets the balance the bank at `bank` holds for `user` in `state`, if it is
/// concrete.
pub fn stored_balance(state: &ExecutionState, bank: Address, user: Address) -> Option<U256> {
    state
        .world()
        .read_storage(bank, &user.as_word())
        .ok()?
        .as_concrete()
}

/// Reads the word argument that follows the selector in `calldata`.
pub fn word_argument(calldata: &[u8]) -> Option<U256> {
    let bytes: [u8; 32] = calldata.get(4..36)?.try_into().ok()?;
    Some(U256::from_be_bytes(bytes))
}
