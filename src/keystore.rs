//! `SecureKeyStore`: the OS-provided opaque map from alias to symmetric key
//! the spec treats as an external collaborator. As with `PreferenceBackend`,
//! the trait is the real deliverable; two concrete implementations exist so
//! the crate's own test suite has something to run against.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;

use crate::backend::{PreferenceBackend, Snapshot};
use crate::codec::StoredValue;
use crate::error::VaultError;

/// Preference-entry prefix used when key material rides inside a
/// `PreferenceBackend` instead of an OS keychain (spec.md §6).
pub const KEY_STORE_PREFIX: &str = "ksafe_key_";

/// Opaque map from alias to symmetric key, with create/get/delete. Treated
/// as an external collaborator by `CryptoEngine`; `CryptoEngine` owns all
/// locking and lazy-generation semantics, this trait only exposes raw
/// storage operations.
#[async_trait::async_trait]
pub trait SecureKeyStore: Send + Sync {
    async fn get(&self, alias: &str) -> Result<Option<Vec<u8>>, VaultError>;
    async fn put(&self, alias: &str, key: &[u8]) -> Result<(), VaultError>;
    async fn delete(&self, alias: &str) -> Result<(), VaultError>;
}

// ---------------------------------------------------------------------------
// In-memory key store
// ---------------------------------------------------------------------------

/// Process-local key store, for tests and ephemeral use.
#[derive(Default)]
pub struct InMemorySecureKeyStore {
    entries: DashMap<String, Vec<u8>>,
}

impl InMemorySecureKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SecureKeyStore for InMemorySecureKeyStore {
    async fn get(&self, alias: &str) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.entries.get(alias).map(|v| v.clone()))
    }

    async fn put(&self, alias: &str, key: &[u8]) -> Result<(), VaultError> {
        self.entries.insert(alias.to_string(), key.to_vec());
        Ok(())
    }

    async fn delete(&self, alias: &str) -> Result<(), VaultError> {
        self.entries.remove(alias);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Preference-backed key store
// ---------------------------------------------------------------------------

/// Stores each alias's raw key as base64 under `"ksafe_key_" + alias` inside
/// a `PreferenceBackend`, for the platforms/tests where no OS keychain is
/// available and key material rides in the same durable store as the data
/// it protects (spec.md §6's documented on-disk layout for that case).
pub struct PreferenceSecureKeyStore {
    backend: Arc<dyn PreferenceBackend>,
}

impl PreferenceSecureKeyStore {
    pub fn new(backend: Arc<dyn PreferenceBackend>) -> Self {
        Self { backend }
    }

    fn storage_key(alias: &str) -> String {
        format!("{KEY_STORE_PREFIX}{alias}")
    }

    fn snapshot_entry(snapshot: &Snapshot, alias: &str) -> Option<Vec<u8>> {
        match snapshot.get(&Self::storage_key(alias)) {
            Some(StoredValue::Str(b64)) => BASE64.decode(b64).ok(),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl SecureKeyStore for PreferenceSecureKeyStore {
    async fn get(&self, alias: &str) -> Result<Option<Vec<u8>>, VaultError> {
        let snapshot = self.backend.current_snapshot().await;
        Ok(Self::snapshot_entry(&snapshot, alias))
    }

    async fn put(&self, alias: &str, key: &[u8]) -> Result<(), VaultError> {
        let storage_key = Self::storage_key(alias);
        let encoded = BASE64.encode(key);
        self.backend
            .edit(Box::new(move |edit| edit.put(storage_key, StoredValue::Str(encoded))))
            .await
    }

    async fn delete(&self, alias: &str) -> Result<(), VaultError> {
        let storage_key = Self::storage_key(alias);
        self.backend
            .edit(Box::new(move |edit| edit.remove(&storage_key)))
            .await
    }
}
