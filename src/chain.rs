//! The chain: genesis, pending queue, block production, validation, replay.
//!
//! The chain owns the state store and the executor. Clients queue
//! transactions; `produce_pending_transactions` drains the queue into a new
//! block on top of the latest one. Blocks are never mutated after being
//! appended, except by replay, which re-executes every block in order onto
//! a fresh store and must leave a correctly stored chain unchanged.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::executor::Executor;
use crate::registry::ContractEntry;
use crate::store::{table_name, StateStore};
use crate::types::{Block, Transaction};
use crate::{CONTRACTS_COLLECTION, EXECUTION_QUANTUM_SECS, GENESIS_TIMESTAMP, MAX_CALL_DEPTH};

/// Chain configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Timestamp carried by the genesis block
    #[serde(default = "default_genesis_timestamp")]
    pub genesis_timestamp: String,
    /// Wall-clock ceiling per top-level contract run
    #[serde(default = "default_execution_quantum")]
    pub execution_quantum: Duration,
    /// Cap on reentrant contract-to-contract call depth
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_genesis_timestamp() -> String {
    GENESIS_TIMESTAMP.to_string()
}

fn default_execution_quantum() -> Duration {
    Duration::from_secs(EXECUTION_QUANTUM_SECS)
}

fn default_max_call_depth() -> usize {
    MAX_CALL_DEPTH
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            genesis_timestamp: default_genesis_timestamp(),
            execution_quantum: default_execution_quantum(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

/// Chain validation failures
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChainError {
    /// Stored Merkle root does not match the recomputed root
    #[error("block {number}: merkle root mismatch")]
    MerkleRootMismatch {
        /// Height of the offending block
        number: u64,
    },
    /// Stored block hash does not match the recomputed hash
    #[error("block {number}: hash mismatch")]
    HashMismatch {
        /// Height of the offending block
        number: u64,
    },
    /// `previousHash` does not match the predecessor's stored hash
    #[error("block {number}: broken linkage to predecessor")]
    BrokenLinkage {
        /// Height of the offending block
        number: u64,
    },
}

/// A hash-linked chain of blocks over an in-memory state store
pub struct Chain {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    store: Rc<RefCell<StateStore>>,
    executor: Rc<Executor>,
}

impl Chain {
    /// Create a chain with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ChainConfig::default())
    }

    /// Create a chain: fresh store with the reserved `contracts` collection
    /// and a finalised genesis block
    #[must_use]
    pub fn with_config(config: ChainConfig) -> Self {
        let store = Rc::new(RefCell::new(StateStore::new()));
        let executor = Executor::new(
            Rc::clone(&store),
            config.execution_quantum,
            config.max_call_depth,
        );
        let genesis = Block::genesis(Some(config.genesis_timestamp.as_str()));

        info!(
            target: "emberchain::chain",
            hash = %genesis.hash,
            "chain initialised"
        );

        Self {
            blocks: vec![genesis],
            pending: Vec::new(),
            store,
            executor,
        }
    }

    /// Queue a transaction. No validation happens here; a malformed
    /// transaction earns its error record at production time.
    pub fn create_transaction(&mut self, tx: Transaction) {
        self.pending.push(tx);
    }

    /// Drain the pending queue into a new block on top of the latest one,
    /// produce it, and append it.
    pub fn produce_pending_transactions(&mut self, timestamp: &str) -> &Block {
        let transactions = std::mem::take(&mut self.pending);
        let latest = self.get_latest_block_info();
        let mut block = Block::new(
            latest.block_number + 1,
            latest.hash.clone(),
            timestamp.to_string(),
            transactions,
        );

        block.produce(&self.executor);

        info!(
            target: "emberchain::chain",
            number = block.block_number,
            transactions = block.transactions.len(),
            hash = %block.hash,
            "block produced"
        );

        self.blocks.push(block);
        self.get_latest_block_info()
    }

    /// Verify chain integrity, reporting the first failing check.
    ///
    /// For every non-genesis block: the stored Merkle root matches the
    /// recomputed root, the stored hash matches the hash recomputed with the
    /// current logs, and `previousHash` matches the predecessor's stored
    /// hash.
    pub fn verify(&self) -> Result<(), ChainError> {
        for window in self.blocks.windows(2) {
            let [previous, block] = window else {
                continue;
            };
            if block.compute_merkle_root() != block.merkle_root {
                return Err(ChainError::MerkleRootMismatch {
                    number: block.block_number,
                });
            }
            if block.compute_hash() != block.hash {
                return Err(ChainError::HashMismatch {
                    number: block.block_number,
                });
            }
            if block.previous_hash != previous.hash {
                return Err(ChainError::BrokenLinkage {
                    number: block.block_number,
                });
            }
        }
        Ok(())
    }

    /// Whether every integrity check passes
    #[must_use]
    pub fn is_chain_valid(&self) -> bool {
        self.verify().is_ok()
    }

    /// Reset state to a fresh store holding only the reserved `contracts`
    /// collection, then re-produce every block in order, genesis included.
    ///
    /// Overwrites `logs`, `hash`, and `merkleRoot` in place; a correctly
    /// stored chain is a fixed point of this procedure.
    pub fn replay_blockchain(&mut self) {
        info!(target: "emberchain::chain", blocks = self.blocks.len(), "replaying chain from genesis");

        {
            let mut store = self.store.borrow_mut();
            *store = StateStore::new();
            store.create_collection(CONTRACTS_COLLECTION);
        }
        self.executor.clear_artifacts();

        for block in &mut self.blocks {
            block.produce(&self.executor);
        }
    }

    /// Block at height `number`, if any
    #[must_use]
    pub fn get_block_info(&self, number: u64) -> Option<&Block> {
        usize::try_from(number)
            .ok()
            .and_then(|index| self.blocks.get(index))
    }

    /// The most recently appended block
    #[must_use]
    pub fn get_latest_block_info(&self) -> &Block {
        // The chain always holds at least the genesis block
        self.blocks.last().expect("chain holds the genesis block")
    }

    /// Read a contract's table by explicit contract and logical table name
    #[must_use]
    pub fn find_in_table(&self, contract: &str, table: &str, query: &Value) -> Vec<Value> {
        let name = table_name(contract, table);
        self.store
            .borrow()
            .collection(&name)
            .map(|collection| collection.find(query))
            .unwrap_or_default()
    }

    /// Single-row variant of [`Chain::find_in_table`]
    #[must_use]
    pub fn find_one_in_table(&self, contract: &str, table: &str, query: &Value) -> Option<Value> {
        let name = table_name(contract, table);
        self.store
            .borrow()
            .collection(&name)
            .and_then(|collection| collection.find_one(query))
    }

    /// Registry entry of a deployed contract
    #[must_use]
    pub fn get_contract(&self, name: &str) -> Option<ContractEntry> {
        self.executor.registry().get(name)
    }

    /// Number of blocks, genesis included
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of queued transactions
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// All blocks, in order
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Deterministic dump of the whole state store
    #[must_use]
    pub fn state_dump(&self) -> Value {
        self.store.borrow().dump()
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}
