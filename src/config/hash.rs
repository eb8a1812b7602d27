//! Spec hashing for change detection.
//!
//! Reconcilers compare the hash recorded in a resource's state against the
//! hash of its current spec to decide whether external objects need to be
//! rebuilt.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hasher for computing deterministic spec hashes.
#[derive(Debug, Default)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new spec hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hex-encoded SHA-256 hash of any serializable value.
    ///
    /// Values are hashed through their JSON form. Maps must have a
    /// deterministic iteration order (`BTreeMap`) for the hash to be stable.
    #[must_use]
    pub fn hash<T: Serialize>(&self, value: &T) -> String {
        let mut hasher = Sha256::new();
        match serde_json::to_vec(value) {
            Ok(bytes) => hasher.update(&bytes),
            Err(e) => hasher.update(e.to_string().as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Hashes a list of string parts, separated so that `["ab", "c"]` and
    /// `["a", "bc"]` differ.
    #[must_use]
    pub fn hash_parts(&self, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Returns true if two hashes are equal.
    #[must_use]
    pub fn hashes_equal(a: &str, b: &str) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_hash_deterministic() {
        let hasher = SpecHasher::new();
        let mut map = BTreeMap::new();
        map.insert("sql", "select 1");
        map.insert("connector", "duckdb");

        let hash1 = hasher.hash(&map);
        let hash2 = hasher.hash(&map.clone());

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let hasher = SpecHasher::new();
        let a = hasher.hash(&"select 1");
        let b = hasher.hash(&"select 2");
        assert!(!SpecHasher::hashes_equal(&a, &b));
    }

    #[test]
    fn test_hash_parts_are_separated() {
        let hasher = SpecHasher::new();
        assert_ne!(hasher.hash_parts(&["ab", "c"]), hasher.hash_parts(&["a", "bc"]));
    }
}
