//! This library implements a symbolic execution engine for
//! [EVM](https://ethereum.org/en/developers/docs/evm/) bytecode. It explores
//! every feasible path through sequences of transactions against deployed
//! contracts, and reports each path's outcome together with a concrete
//! testcase that reproduces it.
//!
//! # How it Works
//!
//! From a very high level, exploration proceeds as follows:
//!
//! 1. Bytecode is decoded into a [`disassembly::Program`], a sequence of
//!    [`opcode::Opcode`]s with its valid jump destinations.
//! 2. A [`harness::Engine`] sets up the accounts and contracts of a
//!    [`world::WorldState`], and queues transactions whose arguments may be
//!    [`expr::SymbolicValue`]s.
//! 3. Each transaction is run from every ready state by the
//!    [`explorer::Explorer`], which steps states on the [`vm::Interpreter`]
//!    and forks them wherever a branch depends on symbolic data.
//! 4. The [`solver::Solver`] prunes the branches whose path condition cannot
//!    hold, and produces the models from which testcases are built.
//! 5. The resulting [`explorer::Campaign`] holds every terminal state and
//!    every state that was left unexplored when the bounds ran out.
//!
//! # Basic Usage
//!
//! ```
//! use evm_path_explorer::{
//!     explorer::TerminationPolicy,
//!     expr::SymbolicValue,
//!     harness::{abi::Value, contract::Contract, creation_code, Config, Engine},
//!     opcode::{asm::Assembler, Opcode},
//!     vm::outcome::OutcomeKind,
//! };
//!
//! // Reverts unless the first argument is zero.
//! let runtime = Assembler::new()
//!     .push(4u8)
//!     .op(Opcode::CallDataLoad)
//!     .push_label("reject")
//!     .op(Opcode::JumpI)
//!     .op(Opcode::Stop)
//!     .label("reject")
//!     .push(0u8)
//!     .push(0u8)
//!     .op(Opcode::Revert)
//!     .assemble()
//!     .unwrap();
//! let contract = Contract::from_bytecode("Zero", creation_code(&runtime));
//!
//! let mut engine = Engine::new(Config::default());
//! let user = engine.create_account(SymbolicValue::word(1_000u64)).unwrap();
//! let zero = engine
//!     .deploy_contract(&contract, &user, &[], SymbolicValue::word(0u8))
//!     .unwrap();
//!
//! let argument = engine.fresh_symbolic_value(256, "argument");
//! engine
//!     .invoke(&zero, [0; 4], &[Value::from(argument)], &user, SymbolicValue::word(0u8))
//!     .unwrap();
//! let campaign = engine.run(&TerminationPolicy::default()).unwrap();
//!
//! assert_eq!(campaign.by_kind(OutcomeKind::Revert).len(), 1);
//! assert_eq!(campaign.successes().count(), 1);
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod disassembly;
pub mod error;
pub mod explorer;
pub mod expr;
pub mod harness;
pub mod opcode;
pub mod solver;
pub mod vm;
pub mod watchdog;
pub mod world;

// Re-exports to provide the library interface.
pub use explorer::{Campaign, TerminationPolicy};
pub use harness::Engine;
