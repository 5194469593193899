//! This module contains constants that are needed throughout the codebase.

use std::time::Duration;

/// The maximum size that a contract can have when being deployed on the
/// blockchain.
///
/// This is specified in [EIP-170](https://eips.ethereum.org/EIPS/eip-170).
pub const CONTRACT_MAXIMUM_SIZE_BYTES: usize = 24_576;

/// The maximum amount of gas that can be spent in a given block on the EVM.
pub const BLOCK_GAS_LIMIT: u64 = 30_000_000;

/// The maximum size that memory can be within the block gas limit.
///
/// Obtained by solving:
///
/// ```text
/// 3 * a + (a^2 / 512) = 30,000,000
/// ```
pub const MAX_MEMORY_SIZE_WORDS: usize = 123_170;

/// The maximum memory size within the block limit in bytes.
pub const MAX_MEMORY_SIZE_BYTES: usize = MAX_MEMORY_SIZE_WORDS * WORD_SIZE_BYTES;

/// The base byte value for the `PUSH` opcode, for `N > 0`.
///
/// This is constructed such that for `PUSHN`, `PUSH_OPCODE_BASE_VALUE` + `N`
/// equals the byte value for the corresponding `PUSH` opcode.
pub const PUSH_OPCODE_BASE_VALUE: u8 = 0x5f;

/// The base byte value for the `DUP` opcode.
///
/// This is constructed such that for `DUPN`, `DUP_OPCODE_BASE_VALUE` + `N`
/// equals the byte value for the corresponding `DUP` opcode.
pub const DUP_OPCODE_BASE_VALUE: u8 = 0x7f;

/// The base byte value for the `SWAP` opcode.
///
/// This is constructed such that for `SWAPN`, `SWAP_OPCODE_BASE_VALUE` + `N`
/// equals the byte value for the corresponding `SWAP` opcode.
pub const SWAP_OPCODE_BASE_VALUE: u8 = 0x8f;

/// The base byte value for the `LOG` opcode.
///
/// This is constructed such that for `LOGN`, `LOG_OPCODE_BASE_VALUE` + `N`
/// equals the byte value for the corresponding `LOG` opcode.
pub const LOG_OPCODE_BASE_VALUE: u8 = 0xa0;

/// The maximum number of bytes that can be pushed at once using the `PUSH`
/// opcode.
pub const PUSH_OPCODE_MAX_BYTES: u8 = 32;

/// The maximum stack depth for the EVM.
pub const MAXIMUM_STACK_DEPTH: usize = 1024;

/// The maximum depth of nested message calls on the EVM.
pub const MAXIMUM_CALL_DEPTH: usize = 1024;

/// The width of word on the EVM in bits.
pub const WORD_SIZE_BITS: u16 = 256;

/// The width of a byte on the EVM (and most other places) in bits.
pub const BYTE_SIZE_BITS: u16 = 8;

/// The width of a word on the EVM in bytes.
pub const WORD_SIZE_BYTES: usize = (WORD_SIZE_BITS / BYTE_SIZE_BITS) as usize;

/// The bit-width of a boolean as produced by comparison operators.
pub const BOOL_WIDTH_BITS: u16 = 1;

/// The bit-width of an address type.
pub const ADDRESS_WIDTH_BITS: u16 = 160;

/// The width of a function selector in bytes.
pub const SELECTOR_WIDTH_BYTES: usize = 4;

/// The default number of interpreter steps that a single state may take before
/// it is reported as unexplored.
pub const DEFAULT_MAX_STEPS_PER_STATE: usize = 100_000;

/// The default number of worker threads used by the explorer.
pub const DEFAULT_EXPLORER_WORKERS: usize = 1;

/// The default time allowed for a single external solver query.
pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_secs(10);

/// The default number of times a timed-out solver query is retried with a
/// doubled timeout.
pub const DEFAULT_SOLVER_RETRIES: usize = 1;

/// The default total number of external solver queries allowed in one engine.
pub const DEFAULT_SOLVER_QUERY_BUDGET: usize = 10_000;

/// The default number of external solver queries that may be in flight at once.
pub const DEFAULT_SOLVER_CONCURRENCY_LIMIT: usize = 4;

/// The default number of candidate assignments the built-in solver will try
/// before giving up on finding a model.
pub const DEFAULT_SOLVER_CANDIDATE_LIMIT: usize = 4_096;

/// The default command line used to start the external solver process.
pub const DEFAULT_SOLVER_COMMAND: [&str; 3] = ["z3", "-in", "-smt2"];

/// The default number of loop iterations the explorer will wait before polling
/// the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 1;

/// The default chain identifier reported by the `CHAINID` opcode.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// The default value for whether the harness bounds symbolic arguments to the
/// width of their ABI type.
pub const DEFAULT_BOUND_SYMBOLIC_ARGUMENTS: bool = true;

/// The selector of Solidity's `Panic(uint256)` error.
pub const SOLIDITY_PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// The panic code Solidity uses for a failed `assert`.
pub const SOLIDITY_ASSERTION_PANIC_CODE: u8 = 0x01;

/// The byte of the designated invalid instruction.
pub const INVALID_OPCODE_BYTE: u8 = 0xfe;

/// The gas charged per byte of code deposited by a contract creation.
pub const CODE_DEPOSIT_GAS_PER_BYTE: u64 = 200;

/// The default block timestamp reported by the `TIMESTAMP` opcode.
pub const DEFAULT_BLOCK_TIMESTAMP: u64 = 1_700_000_000;

/// The default block number reported by the `NUMBER` opcode.
pub const DEFAULT_BLOCK_NUMBER: u64 = 18_000_000;

/// The default base fee, in wei, reported by the `BASEFEE` opcode.
pub const DEFAULT_BASE_FEE: u64 = 1_000_000_000;

/// The default gas price, in wei, reported by the `GASPRICE` opcode.
pub const DEFAULT_GAS_PRICE: u64 = 1_000_000_000;

/// The gas charged per byte of the exponent by the `EXP` opcode.
pub const EXP_GAS_PER_BYTE: u64 = 50;

/// The gas charged per word copied into memory by the copy opcodes.
pub const COPY_GAS_PER_WORD: u64 = 3;

/// The gas charged per word hashed by the `KECCAK256` opcode.
pub const KECCAK_GAS_PER_WORD: u64 = 6;

/// The gas charged per byte of data logged by the `LOG` opcodes.
pub const LOG_GAS_PER_BYTE: u64 = 8;

/// The number of steps a worker takes on one state between checks of the
/// exploration's time budget.
pub const DEADLINE_POLL_STEPS: usize = 1_024;

/// The address of the first account created by the harness.
pub const FIRST_ACCOUNT_ADDRESS: u64 = 0x1_0000;
