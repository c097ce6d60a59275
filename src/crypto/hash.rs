//! SHA-256 hashing and Merkle root computation.
//!
//! All hashes in the engine are lowercase hex strings. Block and transaction
//! hashes are digests over concatenated string fields; the Merkle root is a
//! bottom-up pairwise reduction over transaction hashes.

use sha2::{Digest, Sha256};

/// SHA-256 over the UTF-8 concatenation of `parts`, as lowercase hex.
#[must_use]
pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Merkle root of `leaves`, duplicating the last element on odd levels.
///
/// An empty leaf set has the empty string as its root. A single leaf is its
/// own root. Parents are `SHA256(left || right)` over the hex strings of the
/// children.
#[must_use]
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return String::new();
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(sha256_hex(&[left, right]));
        }
        level = next;
    }

    level.pop().unwrap_or_default()
}
