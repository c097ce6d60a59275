//! Contract registry: deployed contract metadata in the reserved collection.
//!
//! The registry is not a separate structure. It is a view over the
//! `contracts` collection of the state store, so replaying the chain from an
//! empty store rebuilds it along with everything else. Deployment is
//! one-shot: entries are never redeployed, and the only bookkeeping write is
//! the owned-tables set.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::store::StateStore;
use crate::CONTRACTS_COLLECTION;

/// Error raised when deploying a name that is already registered
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("contract already exists")]
pub struct DuplicateContract;

/// Metadata of a deployed contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    /// Globally unique contract name
    pub name: String,
    /// Sender of the deploying transaction
    pub owner: String,
    /// Wrapped dispatch source; compiled artifacts are cached in-process
    pub code: String,
    /// Fully-qualified names of the tables this contract owns
    pub tables: Vec<String>,
}

/// View over the reserved `contracts` collection
#[derive(Clone)]
pub struct ContractRegistry {
    store: Rc<RefCell<StateStore>>,
}

impl ContractRegistry {
    /// Create the registry view, ensuring the reserved collection exists
    #[must_use]
    pub fn new(store: Rc<RefCell<StateStore>>) -> Self {
        store.borrow_mut().create_collection(CONTRACTS_COLLECTION);
        Self { store }
    }

    /// Look up a contract by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ContractEntry> {
        let store = self.store.borrow();
        let doc = store
            .collection(CONTRACTS_COLLECTION)?
            .find_one(&json!({ "name": name }))?;
        serde_json::from_value(doc).ok()
    }

    /// Whether a contract with this name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Register a freshly deployed contract. Fails if the name is taken;
    /// there is no update path for deployed code.
    pub fn insert(&self, entry: &ContractEntry) -> Result<(), DuplicateContract> {
        if self.contains(&entry.name) {
            return Err(DuplicateContract);
        }
        let doc = serde_json::to_value(entry).unwrap_or_default();
        self.store
            .borrow_mut()
            .create_collection(CONTRACTS_COLLECTION)
            .insert(doc);
        Ok(())
    }

    /// Record a table into a contract's owned set. Idempotent; a no-op for
    /// unregistered contracts.
    pub fn record_table(&self, contract: &str, table: &str) {
        let Some(mut entry) = self.get(contract) else {
            return;
        };
        if entry.tables.iter().any(|owned| owned == table) {
            return;
        }
        entry.tables.push(table.to_string());

        let doc = serde_json::to_value(&entry).unwrap_or_default();
        let query = json!({ "name": contract });
        if let Some(collection) = self.store.borrow_mut().collection_mut(CONTRACTS_COLLECTION) {
            collection.update(&query, &doc);
        }
    }
}
