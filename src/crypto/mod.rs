//! Cryptographic primitives for the chain.
//!
//! Everything tamper-evident in the engine reduces to two pure functions:
//! SHA-256 hex digests over concatenated strings, and a pairwise Merkle
//! reduction over transaction hashes.

mod hash;

pub use hash::{merkle_root, sha256_hex};
