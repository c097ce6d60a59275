//! Transactions: immutable records of contract deployments and invocations.
//!
//! A transaction computes its content hash once, at construction, over its
//! identifying fields. Execution logs are attached later by the executor and
//! deliberately do not feed the transaction hash; they feed the block hash
//! instead, through the serialised transaction list.

use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;

/// Placeholder hashed in place of an absent field
const NULL_FIELD: &str = "null";

/// A contract deployment or invocation request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Block this transaction targets. Advisory; never validated.
    pub ref_block_number: u64,
    /// Opaque identifier, unique within a block
    pub transaction_id: String,
    /// Account submitting the transaction
    pub sender: Option<String>,
    /// Target contract name, or `"contract"` for deployments
    pub contract: Option<String>,
    /// Action to invoke, or `"deploy"` for deployments
    pub action: Option<String>,
    /// JSON-encoded parameters
    pub payload: Option<String>,
    /// Content hash, computed at construction
    pub hash: String,
    /// Execution record: JSON text `{"events":[…]}` or `{"error":…}`,
    /// written by the executor during block production
    pub logs: Option<String>,
}

impl Transaction {
    /// Create a transaction and compute its content hash
    #[must_use]
    pub fn new(
        ref_block_number: u64,
        transaction_id: impl Into<String>,
        sender: Option<String>,
        contract: Option<String>,
        action: Option<String>,
        payload: Option<String>,
    ) -> Self {
        let mut tx = Self {
            ref_block_number,
            transaction_id: transaction_id.into(),
            sender,
            contract,
            action,
            payload,
            hash: String::new(),
            logs: None,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Content hash over `refBlockNumber || transactionId || sender ||
    /// contract || action || payload`, with the literal `null` standing in
    /// for absent fields.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let ref_block_number = self.ref_block_number.to_string();
        sha256_hex(&[
            &ref_block_number,
            &self.transaction_id,
            self.sender.as_deref().unwrap_or(NULL_FIELD),
            self.contract.as_deref().unwrap_or(NULL_FIELD),
            self.action.as_deref().unwrap_or(NULL_FIELD),
            self.payload.as_deref().unwrap_or(NULL_FIELD),
        ])
    }

    /// Attach the execution record. The sole permitted mutation; replay
    /// overwrites it in place.
    pub fn add_logs(&mut self, logs: String) {
        self.logs = Some(logs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction::new(
            1,
            "tx-1",
            Some("alice".to_string()),
            Some("tok".to_string()),
            Some("mint".to_string()),
            Some(r#"{"a":"bob","v":10}"#.to_string()),
        )
    }

    #[test]
    fn test_hash_computed_at_construction() {
        let tx = sample();
        assert_eq!(tx.hash, tx.compute_hash());
        assert!(!tx.hash.is_empty());
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(sample().hash, sample().hash);
    }

    #[test]
    fn test_absent_fields_hash_as_null_literal() {
        let tx = Transaction::new(0, "tx-2", None, None, None, None);
        let expected = sha256_hex(&["0", "tx-2", "null", "null", "null", "null"]);
        assert_eq!(tx.hash, expected);
    }

    #[test]
    fn test_logs_do_not_feed_transaction_hash() {
        let mut tx = sample();
        let before = tx.hash.clone();
        tx.add_logs(r#"{"events":[]}"#.to_string());
        assert_eq!(tx.compute_hash(), before);
    }

    #[test]
    fn test_wire_form_is_camel_case() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("refBlockNumber"));
        assert!(json.contains("transactionId"));
        assert!(!json.contains("ref_block_number"));
    }
}
