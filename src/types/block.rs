//! Blocks: ordered transaction batches with hash and Merkle commitments.
//!
//! A block produces itself: it runs each of its transactions through the
//! executor in queue order, attaches the resulting logs, and only then
//! finalises its hash and Merkle root. The block hash covers the serialised
//! transaction list, so logs are tamper-evident; the Merkle root covers the
//! transaction hashes alone, so it is deterministic from the transaction
//! list regardless of execution.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::crypto::{merkle_root, sha256_hex};
use crate::executor::Executor;
use crate::types::Transaction;
use crate::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};

/// An ordered batch of transactions in the chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Height: predecessor's number plus one, genesis is zero
    pub block_number: u64,
    /// Predecessor's hash; the genesis block carries the literal `"0"`
    pub previous_hash: String,
    /// Opaque timestamp supplied by the producer
    pub timestamp: String,
    /// Transactions in queue order
    pub transactions: Vec<Transaction>,
    /// SHA-256 over `previousHash || timestamp || JSON(transactions)`,
    /// finalised after execution so logs participate
    pub hash: String,
    /// Merkle root over the transaction hashes
    pub merkle_root: String,
}

impl Block {
    /// Create an unproduced block. `hash` and `merkle_root` stay empty until
    /// [`Block::produce`] runs.
    #[must_use]
    pub fn new(
        block_number: u64,
        previous_hash: String,
        timestamp: String,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            block_number,
            previous_hash,
            timestamp,
            transactions,
            hash: String::new(),
            merkle_root: String::new(),
        }
    }

    /// The genesis block: height zero, previous hash `"0"`, no transactions
    #[must_use]
    pub fn genesis(timestamp: Option<&str>) -> Self {
        let mut block = Self::new(
            0,
            GENESIS_PREVIOUS_HASH.to_string(),
            timestamp.unwrap_or(GENESIS_TIMESTAMP).to_string(),
            Vec::new(),
        );
        block.finalise();
        block
    }

    /// Execute every transaction in order, attach its logs, then finalise
    /// the hash and Merkle root. Later transactions observe state mutations
    /// made by earlier ones.
    pub fn produce(&mut self, executor: &Rc<Executor>) {
        for tx in &mut self.transactions {
            let logs = executor.execute(tx);
            tx.add_logs(logs);
        }
        self.finalise();
    }

    /// Block hash over `previousHash || timestamp || JSON(transactions)`
    #[must_use]
    pub fn compute_hash(&self) -> String {
        // Serialising plain string fields cannot fail
        let transactions = serde_json::to_string(&self.transactions).unwrap_or_default();
        sha256_hex(&[&self.previous_hash, &self.timestamp, &transactions])
    }

    /// Merkle root over the transaction hashes, in order
    #[must_use]
    pub fn compute_merkle_root(&self) -> String {
        let leaves: Vec<String> = self.transactions.iter().map(|tx| tx.hash.clone()).collect();
        merkle_root(&leaves)
    }

    fn finalise(&mut self) {
        self.hash = self.compute_hash();
        self.merkle_root = self.compute_merkle_root();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str) -> Transaction {
        Transaction::new(
            1,
            id,
            Some("alice".to_string()),
            Some("tok".to_string()),
            Some("mint".to_string()),
            None,
        )
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(None);

        assert_eq!(genesis.block_number, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.timestamp, GENESIS_TIMESTAMP);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.hash, genesis.compute_hash());
        assert_eq!(genesis.merkle_root, "");
    }

    #[test]
    fn test_hash_covers_logs() {
        let mut block = Block::new(1, "0".to_string(), "t1".to_string(), vec![tx("a")]);
        block.finalise();
        let before = block.hash.clone();

        block.transactions[0].add_logs(r#"{"events":[]}"#.to_string());
        assert_ne!(block.compute_hash(), before);
    }

    #[test]
    fn test_merkle_root_ignores_logs() {
        let mut block = Block::new(1, "0".to_string(), "t1".to_string(), vec![tx("a"), tx("b")]);
        block.finalise();
        let before = block.merkle_root.clone();

        block.transactions[0].add_logs(r#"{"events":[]}"#.to_string());
        assert_eq!(block.compute_merkle_root(), before);
    }

    #[test]
    fn test_hash_deterministic() {
        let make = || {
            let mut block =
                Block::new(3, "prev".to_string(), "t9".to_string(), vec![tx("a"), tx("b")]);
            block.finalise();
            block
        };
        assert_eq!(make().hash, make().hash);
        assert_eq!(make().merkle_root, make().merkle_root);
    }

    #[test]
    fn test_empty_block_merkle_root_is_empty() {
        let mut block = Block::new(1, "prev".to_string(), "t1".to_string(), Vec::new());
        block.finalise();
        assert_eq!(block.merkle_root, "");
        assert!(!block.hash.is_empty());
    }
}
