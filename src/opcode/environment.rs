//! Opcodes that interact with the external environment on the EVM: the
//! accounts of the world, the current call context and the block.

use ethnum::U256;

use crate::{
    constant::{KECCAK_GAS_PER_WORD, LOG_GAS_PER_BYTE, WORD_SIZE_BYTES},
    expr::{word::Word, SymbolicValue},
    opcode::memory::concrete_address,
    vm::{outcome::Log, state::ExecutionState, Config, Effect, OpResult},
};

/// The `KECCAK256` opcode computes the Keccak-256 hash of a region of memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output                                 |
/// | :---------: | :------: | :------------------------------------: |
/// | 1           | `offset` | `keccak256(mem[offset..offset+size])`  |
/// | 2           | `size`   |                                        |
///
/// The hash of concrete data is computed directly. Otherwise the result is an
/// uninterpreted hash expression over the bytes, which the solver treats as an
/// injective function.
pub fn sha3(state: &mut ExecutionState) -> OpResult {
    let [offset, size] = state.frame.stack.pop_n()?;
    let (offset, size) = state.memory_range(&offset, &size)?;
    let words = u64::try_from(size.div_ceil(WORD_SIZE_BYTES)).unwrap_or(u64::MAX);
    state.charge_gas(KECCAK_GAS_PER_WORD.saturating_mul(words))?;

    let hash = SymbolicValue::keccak(state.frame.memory.read(offset, size))?;
    state.frame.stack.push(hash)?;
    Ok(Effect::Next)
}

/// The `ADDRESS` opcode gets the address of the currently executing account.
pub fn address(state: &mut ExecutionState) -> OpResult {
    let address = state.frame.env.address.as_word();
    state.frame.stack.push(address)?;
    Ok(Effect::Next)
}

/// The `BALANCE` opcode gets the balance of an account.
///
/// # Semantics
///
/// | Stack Index | Input     | Output             |
/// | :---------: | :-------: | :----------------: |
/// | 1           | `address` | `balance(address)` |
///
/// Accounts that do not exist have a balance of zero.
pub fn balance(state: &mut ExecutionState) -> OpResult {
    let address = state.frame.stack.pop()?;
    let address = concrete_address(&address)?;
    let balance = state.world.balance(address);
    state.frame.stack.push(balance)?;
    Ok(Effect::Next)
}

/// The `ORIGIN` opcode gets the address that signed the transaction.
pub fn origin(state: &mut ExecutionState) -> OpResult {
    let origin = state.frame.env.origin.as_word();
    state.frame.stack.push(origin)?;
    Ok(Effect::Next)
}

/// The `CALLER` opcode gets the address that called into the current frame.
pub fn caller(state: &mut ExecutionState) -> OpResult {
    let caller = state.frame.env.caller.as_word();
    state.frame.stack.push(caller)?;
    Ok(Effect::Next)
}

/// The `CALLVALUE` opcode gets the value sent with the current call.
pub fn call_value(state: &mut ExecutionState) -> OpResult {
    let value = state.frame.env.value.clone();
    state.frame.stack.push(value)?;
    Ok(Effect::Next)
}

/// The block information opcodes `GASPRICE`, `TIMESTAMP`, `NUMBER`,
/// `PREVRANDAO`, `GASLIMIT`, `CHAINID` and `BASEFEE`, each pushing the
/// configured `value`.
pub fn block_value(state: &mut ExecutionState, value: u64) -> OpResult {
    state.frame.stack.push(SymbolicValue::word(value))?;
    Ok(Effect::Next)
}

/// The `EXTCODEHASH` opcode gets the hash of the code of an account.
///
/// # Semantics
///
/// | Stack Index | Input     | Output                                      |
/// | :---------: | :-------: | :-----------------------------------------: |
/// | 1           | `address` | `keccak256(code(address))`, or `0` if the   |
/// |             |           | account does not exist                      |
pub fn ext_code_hash(state: &mut ExecutionState) -> OpResult {
    let address = state.frame.stack.pop()?;
    let address = concrete_address(&address)?;
    let hash = if state.world.contains(address) {
        U256::from_be_bytes(state.world.code(address).code_hash())
    } else {
        U256::ZERO
    };
    state.frame.stack.push(SymbolicValue::word(hash))?;
    Ok(Effect::Next)
}

/// The `BLOCKHASH` opcode gets the hash of one of the 256 most recent blocks.
///
/// # Semantics
///
/// | Stack Index | Input    | Output            |
/// | :---------: | :------: | :---------------: |
/// | 1           | `number` | `hash(number)`    |
///
/// There is no chain behind the configured block, so the hash of a block is
/// modelled as the Keccak-256 hash of its number. Blocks that are concretely
/// out of range hash to zero.
pub fn block_hash(state: &mut ExecutionState, config: &Config) -> OpResult {
    let number = state.frame.stack.pop()?;
    let current = U256::from(config.block.number);
    let in_range = |n: U256| n < current && current - n <= U256::from(256u16);

    let hash = match number.as_concrete() {
        Some(n) if !in_range(n) => SymbolicValue::word(0u8),
        Some(n) => SymbolicValue::from_word(Word::keccak(&n.to_be_bytes())),
        None => {
            let bytes = (0..WORD_SIZE_BYTES)
                .map(|i| number.byte_at(i))
                .collect::<Result<Vec<_>, _>>()?;
            SymbolicValue::keccak(bytes)?
        }
    };
    state.frame.stack.push(hash)?;
    Ok(Effect::Next)
}

/// The `COINBASE` opcode gets the address of the block's beneficiary.
pub fn coinbase(state: &mut ExecutionState, config: &Config) -> OpResult {
    state.frame.stack.push(config.block.coinbase.as_word())?;
    Ok(Effect::Next)
}

/// The `SELFBALANCE` opcode gets the balance of the currently executing
/// account.
pub fn self_balance(state: &mut ExecutionState) -> OpResult {
    let balance = state.world.balance(state.frame.env.address);
    state.frame.stack.push(balance)?;
    Ok(Effect::Next)
}

/// The `GAS` opcode gets the gas remaining to the transaction after this
/// instruction.
pub fn gas(state: &mut ExecutionState) -> OpResult {
    let remaining = state.gas_limit.saturating_sub(state.gas_used);
    state.frame.stack.push(SymbolicValue::word(remaining))?;
    Ok(Effect::Next)
}

/// The `LOG0` to `LOG4` opcodes append a log record with `topic_count`
/// topics.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `size`   |        |
/// | 3..         | `topics` |        |
///
/// The log is discarded if the frame that emitted it fails.
pub fn log(state: &mut ExecutionState, topic_count: u8) -> OpResult {
    let [offset, size] = state.frame.stack.pop_n()?;
    let topics = (0..topic_count)
        .map(|_| state.frame.stack.pop())
        .collect::<Result<Vec<_>, _>>()?;
    let (offset, size) = state.memory_range(&offset, &size)?;
    let bytes = u64::try_from(size).unwrap_or(u64::MAX);
    state.charge_gas(LOG_GAS_PER_BYTE.saturating_mul(bytes))?;

    let data = state.frame.memory.read(offset, size);
    state.logs.push(Log {
        address: state.frame.env.address,
        topics,
        data,
    });
    Ok(Effect::Next)
}
