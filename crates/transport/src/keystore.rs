//! PSK key lookup
//!
//! The transport layer never owns key material; it borrows a store handle
//! for the duration of a handshake. Stores are read-only from the protocol
//! engine's perspective and must be safe for concurrent lookup.

use std::collections::HashMap;

/// Lookup interface for pre-shared keys
///
/// Implementations must never expose key bytes in logs.
pub trait KeyStore: Send + Sync {
    /// Key for an identity, if known
    fn get_key(&self, identity: &str) -> Option<Vec<u8>>;

    /// Whether the identity is provisioned at all
    fn identity_exists(&self, identity: &str) -> bool;
}

/// In-memory key store, built once and shared read-only
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyStore {
    keys: HashMap<String, Vec<u8>>,
}

impl MemoryKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity/key pair, replacing any previous entry
    pub fn insert(&mut self, identity: impl Into<String>, key: impl Into<Vec<u8>>) {
        self.keys.insert(identity.into(), key.into());
    }

    /// Number of provisioned identities
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no identities are provisioned
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get_key(&self, identity: &str) -> Option<Vec<u8>> {
        self.keys.get(identity).cloned()
    }

    fn identity_exists(&self, identity: &str) -> bool {
        self.keys.contains_key(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_round_trip() {
        let mut store = MemoryKeyStore::new();
        store.insert("test_card", vec![0u8; 16]);

        assert!(store.identity_exists("test_card"));
        assert_eq!(store.get_key("test_card"), Some(vec![0u8; 16]));
        assert!(!store.identity_exists("other_card"));
        assert_eq!(store.get_key("other_card"), None);
    }
}
