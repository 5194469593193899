//! Opcodes that move data between the stack, memory, storage and the various
//! read-only byte buffers of the EVM.
//!
//! # Offsets
//!
//! Memory is only addressable at concrete offsets. An instruction whose memory
//! offset or size is symbolic ends the path with
//! [`ExceptionKind::SymbolicOffset`], as does reading a buffer at a symbolic
//! offset. Storage, on the other hand, accepts symbolic keys.

use ethnum::U256;

use crate::{
    constant::{BYTE_SIZE_BITS, COPY_GAS_PER_WORD, WORD_SIZE_BYTES},
    expr::SymbolicValue,
    vm::{
        outcome::ExceptionKind,
        state::{concrete_usize, symbolic_bytes, ExecutionState},
        Effect,
        Interrupt,
        OpResult,
    },
    world::Address,
};

/// The `CALLDATALOAD` opcode gets a word of input data, reading zero past the
/// end of the input.
///
/// # Semantics
///
/// | Stack Index | Input    | Output                            |
/// | :---------: | :------: | :-------------------------------: |
/// | 1           | `offset` | `calldata[offset..offset + 32]`   |
pub fn call_data_load(state: &mut ExecutionState) -> OpResult {
    let offset = state.frame.stack.pop()?;
    let offset = buffer_offset(&offset)?;
    let calldata = &state.frame.env.calldata;
    let bytes = (0..WORD_SIZE_BYTES).map(|i| buffer_byte(calldata, offset, i)).collect();
    state.frame.stack.push(SymbolicValue::concat(bytes)?)?;
    Ok(Effect::Next)
}

/// The `CALLDATASIZE` opcode gets the size of the input data.
///
/// The size is always concrete, as the harness fixes the layout of the
/// calldata before it runs a transaction.
pub fn call_data_size(state: &mut ExecutionState) -> OpResult {
    let size = state.frame.env.calldata.len();
    state.frame.stack.push(usize_word(size))?;
    Ok(Effect::Next)
}

/// The `CALLDATACOPY` opcode copies input data to memory.
///
/// # Semantics
///
/// | Stack Index | Input        | Output |
/// | :---------: | :----------: | :----: |
/// | 1           | `destOffset` |        |
/// | 2           | `offset`     |        |
/// | 3           | `size`       |        |
pub fn call_data_copy(state: &mut ExecutionState) -> OpResult {
    let [destination, offset, size] = state.frame.stack.pop_n()?;
    let source = state.frame.env.calldata.clone();
    copy_to_memory(state, &destination, &offset, &size, &source)?;
    Ok(Effect::Next)
}

/// The `CODESIZE` opcode gets the size of the code running in the current
/// frame.
pub fn code_size(state: &mut ExecutionState) -> OpResult {
    let size = state.frame.program.len();
    state.frame.stack.push(usize_word(size))?;
    Ok(Effect::Next)
}

/// The `CODECOPY` opcode copies the code running in the current frame to
/// memory.
///
/// # Semantics
///
/// | Stack Index | Input        | Output |
/// | :---------: | :----------: | :----: |
/// | 1           | `destOffset` |        |
/// | 2           | `offset`     |        |
/// | 3           | `size`       |        |
pub fn code_copy(state: &mut ExecutionState) -> OpResult {
    let [destination, offset, size] = state.frame.stack.pop_n()?;
    let source = symbolic_bytes(state.frame.program.bytes());
    copy_to_memory(state, &destination, &offset, &size, &source)?;
    Ok(Effect::Next)
}

/// The `EXTCODESIZE` opcode gets the size of the code of another account.
///
/// # Semantics
///
/// | Stack Index | Input     | Output              |
/// | :---------: | :-------: | :-----------------: |
/// | 1           | `address` | `len(code(address))`|
pub fn ext_code_size(state: &mut ExecutionState) -> OpResult {
    let address = state.frame.stack.pop()?;
    let address = concrete_address(&address)?;
    let size = state.world.code(address).len();
    state.frame.stack.push(usize_word(size))?;
    Ok(Effect::Next)
}

/// The `EXTCODECOPY` opcode copies the code of another account to memory.
///
/// # Semantics
///
/// | Stack Index | Input        | Output |
/// | :---------: | :----------: | :----: |
/// | 1           | `address`    |        |
/// | 2           | `destOffset` |        |
/// | 3           | `offset`     |        |
/// | 4           | `size`       |        |
pub fn ext_code_copy(state: &mut ExecutionState) -> OpResult {
    let [address, destination, offset, size] = state.frame.stack.pop_n()?;
    let address = concrete_address(&address)?;
    let source = symbolic_bytes(state.world.code(address).bytes());
    copy_to_memory(state, &destination, &offset, &size, &source)?;
    Ok(Effect::Next)
}

/// The `RETURNDATASIZE` opcode gets the size of the data returned by the most
/// recent call or creation.
pub fn return_data_size(state: &mut ExecutionState) -> OpResult {
    let size = state.return_data.len();
    state.frame.stack.push(usize_word(size))?;
    Ok(Effect::Next)
}

/// The `RETURNDATACOPY` opcode copies the data returned by the most recent
/// call or creation to memory.
///
/// # Semantics
///
/// | Stack Index | Input        | Output |
/// | :---------: | :----------: | :----: |
/// | 1           | `destOffset` |        |
/// | 2           | `offset`     |        |
/// | 3           | `size`       |        |
///
/// # Errors
///
/// Unlike the other copies, reading past the end of the return data halts
/// exceptionally.
pub fn return_data_copy(state: &mut ExecutionState) -> OpResult {
    let [destination, offset, size] = state.frame.stack.pop_n()?;
    let end = concrete_usize(&offset)?.checked_add(concrete_usize(&size)?);
    if end.map_or(true, |end| end > state.return_data.len()) {
        return Err(ExceptionKind::ReturnDataOutOfBounds.into());
    }
    let source = state.return_data.clone();
    copy_to_memory(state, &destination, &offset, &size, &source)?;
    Ok(Effect::Next)
}

/// The `POP` opcode discards the top stack item.
pub fn pop(state: &mut ExecutionState) -> OpResult {
    state.frame.stack.pop()?;
    Ok(Effect::Next)
}

/// The `MLOAD` opcode loads a word from memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output                          |
/// | :---------: | :------: | :-----------------------------: |
/// | 1           | `offset` | `memory[offset..offset + 32]`   |
pub fn m_load(state: &mut ExecutionState) -> OpResult {
    let offset = state.frame.stack.pop()?;
    let (offset, _) = state.memory_range(&offset, &usize_word(WORD_SIZE_BYTES))?;
    let value = state.frame.memory.load_word(offset)?;
    state.frame.stack.push(value)?;
    Ok(Effect::Next)
}

/// The `MSTORE` opcode stores a word in memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `value`  |        |
pub fn m_store(state: &mut ExecutionState) -> OpResult {
    let [offset, value] = state.frame.stack.pop_n()?;
    let (offset, _) = state.memory_range(&offset, &usize_word(WORD_SIZE_BYTES))?;
    state.frame.memory.store_word(offset, &value)?;
    Ok(Effect::Next)
}

/// The `MSTORE8` opcode stores the least significant byte of a word in
/// memory.
///
/// # Semantics
///
/// | Stack Index | Input    | Output |
/// | :---------: | :------: | :----: |
/// | 1           | `offset` |        |
/// | 2           | `value`  |        |
pub fn m_store_8(state: &mut ExecutionState) -> OpResult {
    let [offset, value] = state.frame.stack.pop_n()?;
    let (offset, _) = state.memory_range(&offset, &usize_word(1))?;
    state.frame.memory.write_byte(offset, value.extract(BYTE_SIZE_BITS - 1, 0)?);
    Ok(Effect::Next)
}

/// The `SLOAD` opcode loads a word from the storage of the current account.
///
/// # Semantics
///
/// | Stack Index | Input | Output         |
/// | :---------: | :---: | :------------: |
/// | 1           | `key` | `storage[key]` |
pub fn s_load(state: &mut ExecutionState) -> OpResult {
    let key = state.frame.stack.pop()?;
    let value = state.world.read_storage(state.frame.env.address, &key)?;
    state.frame.stack.push(value)?;
    Ok(Effect::Next)
}

/// The `SSTORE` opcode stores a word in the storage of the current account.
///
/// # Semantics
///
/// | Stack Index | Input   | Output |
/// | :---------: | :-----: | :----: |
/// | 1           | `key`   |        |
/// | 2           | `value` |        |
pub fn s_store(state: &mut ExecutionState) -> OpResult {
    let [key, value] = state.frame.stack.pop_n()?;
    state.world = state.world.write_storage(state.frame.env.address, key, value);
    Ok(Effect::Next)
}

/// The `MSIZE` opcode gets the active size of memory in bytes.
pub fn m_size(state: &mut ExecutionState) -> OpResult {
    let size = state.frame.memory.size();
    state.frame.stack.push(usize_word(size))?;
    Ok(Effect::Next)
}

/// The `PUSH0` to `PUSH32` opcodes push their immediate data.
pub fn push(state: &mut ExecutionState, value: U256) -> OpResult {
    state.frame.stack.push(SymbolicValue::word(value))?;
    Ok(Effect::Next)
}

/// The `DUPN` opcodes duplicate the `N`th stack item.
pub fn dup(state: &mut ExecutionState, n: u8) -> OpResult {
    state.frame.stack.dup(usize::from(n).saturating_sub(1))?;
    Ok(Effect::Next)
}

/// The `SWAPN` opcodes swap the top stack item with the `N + 1`th.
pub fn swap(state: &mut ExecutionState, n: u8) -> OpResult {
    state.frame.stack.swap(usize::from(n))?;
    Ok(Effect::Next)
}

/// Copies `size` bytes of `source` from `offset` into memory at
/// `destination`, reading zero past the end of `source`.
fn copy_to_memory(
    state: &mut ExecutionState,
    destination: &SymbolicValue,
    offset: &SymbolicValue,
    size: &SymbolicValue,
    source: &[SymbolicValue],
) -> Result<(), Interrupt> {
    let (destination, size) = state.memory_range(destination, size)?;
    if size == 0 {
        return Ok(());
    }
    let words = u64::try_from(size.div_ceil(WORD_SIZE_BYTES)).unwrap_or(u64::MAX);
    state.charge_gas(COPY_GAS_PER_WORD.saturating_mul(words))?;

    let offset = buffer_offset(offset)?;
    let bytes: Vec<SymbolicValue> = (0..size).map(|i| buffer_byte(source, offset, i)).collect();
    state.frame.memory.write(destination, &bytes);
    Ok(())
}

/// Gets a concrete offset into a read-only buffer.
///
/// Offsets too large for a `usize` are clamped, as everything there reads as
/// zero anyway.
fn buffer_offset(offset: &SymbolicValue) -> Result<usize, ExceptionKind> {
    let offset = offset.as_concrete().ok_or(ExceptionKind::SymbolicOffset)?;
    Ok(usize::try_from(offset).unwrap_or(usize::MAX))
}

/// Gets the byte at `offset + index` of `buffer`, or zero past its end.
fn buffer_byte(buffer: &[SymbolicValue], offset: usize, index: usize) -> SymbolicValue {
    offset
        .checked_add(index)
        .and_then(|i| buffer.get(i))
        .cloned()
        .unwrap_or_else(|| SymbolicValue::constant(0u8, BYTE_SIZE_BITS))
}

/// Gets a concrete account address from a stack item.
pub(crate) fn concrete_address(value: &SymbolicValue) -> Result<Address, ExceptionKind> {
    Address::from_value(value).ok_or(ExceptionKind::SymbolicAddress)
}

/// Constructs a word holding `value`.
pub(crate) fn usize_word(value: usize) -> SymbolicValue {
    SymbolicValue::word(u64::try_from(value).unwrap_or(u64::MAX))
}
