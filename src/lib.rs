//! # `emberchain`
//!
//! A minimal, single-node smart-contract blockchain execution engine.
//!
//! Transactions either deploy new contracts or invoke actions on existing
//! ones. Pending transactions are grouped into blocks, executed one at a time
//! against an in-memory document store inside an isolated sandbox, and linked
//! into a hash-chained, Merkle-rooted chain. The chain is fully replayable:
//! re-executing every block in order from an empty state reconstructs the
//! current state exactly.
//!
//! ## Architecture
//!
//! - **Chain**: genesis, pending queue, append-only block list, validator,
//!   replay
//! - **Block**: ordered transaction batch; produces itself by running each
//!   transaction through the executor
//! - **Executor**: deploy/invoke dispatch, per-run host bindings, reentrant
//!   contract-to-contract calls
//! - **Sandbox**: bounded-time execution of untrusted contract code
//! - **Store**: named collections of JSON documents, owned by the chain
//!
//! Peer-to-peer networking, consensus, persistence, and transaction
//! signatures are deliberately out of scope; the chain read surface is the
//! embedding API.

#![forbid(unsafe_code)]
#![deny(clippy::all, rust_2018_idioms)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    // Const fn not always beneficial for complex types
    clippy::missing_const_for_fn,
    // must_use on every fn is excessive
    clippy::must_use_candidate,
    // Pass by value is fine for small Copy types
    clippy::needless_pass_by_value
)]

pub mod chain;
pub mod crypto;
pub mod executor;
pub mod registry;
pub mod sandbox;
pub mod store;
pub mod types;

pub use chain::{Chain, ChainConfig, ChainError};
pub use executor::{Event, ExecError, Executor};
pub use registry::{ContractEntry, ContractRegistry};
pub use sandbox::{Artifact, Sandbox, SandboxError};
pub use store::{Collection, StateStore};
pub use types::{Block, Transaction};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserved collection holding deployed contract metadata
pub const CONTRACTS_COLLECTION: &str = "contracts";

/// Action name reserved for the deployment bootstrap
pub const RESERVED_ACTION: &str = "create";

/// Pseudo-contract targeted by deployment transactions
pub const DEPLOY_TARGET: &str = "contract";

/// Action dispatching a deployment
pub const DEPLOY_ACTION: &str = "deploy";

/// Wall-clock ceiling per top-level contract run, in seconds
pub const EXECUTION_QUANTUM_SECS: u64 = 10;

/// Cap on reentrant contract-to-contract call depth
pub const MAX_CALL_DEPTH: usize = 16;

/// Timestamp of the genesis block
pub const GENESIS_TIMESTAMP: &str = "2018-06-01T00:00:00";

/// Previous-hash literal carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";
