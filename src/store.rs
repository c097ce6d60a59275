//! In-memory document store backing the chain state.
//!
//! The store holds named collections of JSON documents. Contracts see it only
//! through the table surface the executor installs; the chain owns the store
//! and hands out borrowed access per transaction. Collections iterate in name
//! order and documents in insertion order, so a state dump is deterministic
//! for a given transaction history.

use std::collections::BTreeMap;

use serde_json::Value;

/// Fully-qualified name of a contract-owned table.
///
/// Tables are namespaced as `{contract}_{logical}`; the prefix is what makes
/// ownership checks possible.
#[must_use]
pub fn table_name(contract: &str, logical: &str) -> String {
    format!("{contract}_{logical}")
}

/// Named collections of JSON documents
#[derive(Clone, Debug, Default)]
pub struct StateStore {
    collections: BTreeMap<String, Collection>,
}

impl StateStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection if absent and return it. Idempotent.
    pub fn create_collection(&mut self, name: &str) -> &mut Collection {
        self.collections.entry(name.to_string()).or_default()
    }

    /// Look up a collection by name
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Mutable lookup of a collection by name
    pub fn collection_mut(&mut self, name: &str) -> Option<&mut Collection> {
        self.collections.get_mut(name)
    }

    /// Whether a collection with this name exists
    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Names of all collections, in order
    pub fn collection_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.collections.keys().map(String::as_str)
    }

    /// Serialise the whole store: collection name to document list, in
    /// collection-name order. Two stores with the same history dump to the
    /// same bytes.
    #[must_use]
    pub fn dump(&self) -> Value {
        let mut out = serde_json::Map::new();
        for (name, collection) in &self.collections {
            out.insert(name.clone(), Value::Array(collection.docs.clone()));
        }
        Value::Object(out)
    }
}

/// An ordered collection of JSON documents with equality queries
#[derive(Clone, Debug, Default)]
pub struct Collection {
    docs: Vec<Value>,
}

impl Collection {
    /// Append a document
    pub fn insert(&mut self, doc: Value) {
        self.docs.push(doc);
    }

    /// All documents matching `query`, in insertion order
    #[must_use]
    pub fn find(&self, query: &Value) -> Vec<Value> {
        self.docs
            .iter()
            .filter(|doc| matches(doc, query))
            .cloned()
            .collect()
    }

    /// First document matching `query`
    #[must_use]
    pub fn find_one(&self, query: &Value) -> Option<Value> {
        self.docs.iter().find(|doc| matches(doc, query)).cloned()
    }

    /// Replace every document matching `query` with `doc`; returns the
    /// number of documents replaced.
    pub fn update(&mut self, query: &Value, doc: &Value) -> usize {
        let mut replaced = 0;
        for existing in &mut self.docs {
            if matches(existing, query) {
                *existing = doc.clone();
                replaced += 1;
            }
        }
        replaced
    }

    /// Documents in insertion order
    #[must_use]
    pub fn docs(&self) -> &[Value] {
        &self.docs
    }

    /// Number of documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the collection holds no documents
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Equality-subset match: every field of an object `query` must be present
/// and equal in `doc`. A non-object query matches by whole-value equality.
fn matches(doc: &Value, query: &Value) -> bool {
    match query.as_object() {
        Some(fields) => fields.iter().all(|(key, value)| doc.get(key) == Some(value)),
        None => doc == query,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_collection_idempotent() {
        let mut store = StateStore::new();
        store.create_collection("accounts").insert(json!({"a": 1}));
        store.create_collection("accounts");

        assert_eq!(store.collection("accounts").map(Collection::len), Some(1));
    }

    #[test]
    fn test_find_equality_subset() {
        let mut store = StateStore::new();
        let coll = store.create_collection("bal");
        coll.insert(json!({"a": "bob", "v": 10}));
        coll.insert(json!({"a": "carol", "v": 10}));

        assert_eq!(coll.find(&json!({"a": "bob"})), vec![json!({"a": "bob", "v": 10})]);
        assert_eq!(coll.find(&json!({"v": 10})).len(), 2);
        assert!(coll.find(&json!({"a": "dave"})).is_empty());
    }

    #[test]
    fn test_find_empty_query_matches_all() {
        let mut coll = Collection::default();
        coll.insert(json!({"x": 1}));
        coll.insert(json!({"y": 2}));

        assert_eq!(coll.find(&json!({})).len(), 2);
    }

    #[test]
    fn test_find_one_returns_first_match() {
        let mut coll = Collection::default();
        coll.insert(json!({"a": "bob", "v": 1}));
        coll.insert(json!({"a": "bob", "v": 2}));

        assert_eq!(coll.find_one(&json!({"a": "bob"})), Some(json!({"a": "bob", "v": 1})));
        assert_eq!(coll.find_one(&json!({"a": "eve"})), None);
    }

    #[test]
    fn test_update_replaces_matching() {
        let mut coll = Collection::default();
        coll.insert(json!({"a": "bob", "v": 1}));
        coll.insert(json!({"a": "carol", "v": 1}));

        let replaced = coll.update(&json!({"a": "bob"}), &json!({"a": "bob", "v": 9}));

        assert_eq!(replaced, 1);
        assert_eq!(coll.find_one(&json!({"a": "bob"})), Some(json!({"a": "bob", "v": 9})));
        assert_eq!(coll.find_one(&json!({"a": "carol"})), Some(json!({"a": "carol", "v": 1})));
    }

    #[test]
    fn test_dump_is_deterministic() {
        let build = || {
            let mut store = StateStore::new();
            store.create_collection("zeta").insert(json!({"z": 1}));
            store.create_collection("alpha").insert(json!({"a": 1}));
            store
        };

        let one = build().dump().to_string();
        let two = build().dump().to_string();
        assert_eq!(one, two);
        // Collection order is by name regardless of creation order
        assert!(one.find("alpha") < one.find("zeta"));
    }

    #[test]
    fn test_table_name_qualification() {
        assert_eq!(table_name("tok", "bal"), "tok_bal");
    }
}
