//! `ksafe`: a secure, typed, optionally-encrypted key-value persistence
//! engine. A concurrent in-memory hot cache sits in front of a durable,
//! observable preference store; writes are either committed directly and
//! durably, or optimistically queued and coalesced by a background task.
//! Any value may be transparently AEAD-encrypted under a key that is
//! lazily and exactly-once generated per alias.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ksafe::{InMemoryPreferenceBackend, InMemorySecureKeyStore, Vault, VaultConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let backend = Arc::new(InMemoryPreferenceBackend::new());
//! let key_store = Arc::new(InMemorySecureKeyStore::new());
//! let vault = Vault::new(VaultConfig::default(), backend, key_store).unwrap();
//!
//! vault.put_direct("greeting", "hello".to_string(), false);
//! assert_eq!(vault.get_direct("greeting", String::new(), false), "hello");
//!
//! vault.put("secret", "shh".to_string(), true).await.unwrap();
//! assert_eq!(vault.get("secret", String::new(), true).await, "shh");
//! # }
//! ```
//!
//! ## What's NOT provided
//!
//! Multi-process coordination over the same backing file; cross-instance
//! durability guarantees; transactions spanning multiple keys; schema
//! migration; query or range scans; replication; a network protocol.

mod backend;
mod cache;
mod coalescer;
mod codec;
mod crypto;
mod error;
mod keystore;
mod security;
mod types;
mod ui_state;
mod vault;

pub use backend::{
    Edit, FilePreferenceBackend, InMemoryPreferenceBackend, PreferenceBackend, Snapshot,
};
pub use codec::{Codable, Codec, Json, StoredValue, NULL_SENTINEL};
pub use error::{
    ClearAllError, CryptoError, DeleteError, PutError, SecurityViolationKind, VaultError,
};
pub use keystore::{
    InMemorySecureKeyStore, PreferenceSecureKeyStore, SecureKeyStore, KEY_STORE_PREFIX,
};
pub use security::{SecurityProbes, ViolationCallback};
pub use types::{
    CoalescingConfig, CryptoConfig, KeySize, MemoryPolicy, Namespace, PostureAction,
    SecurityPolicy, VaultConfig,
};
pub use ui_state::{EqualityPolicy, VaultState};
pub use vault::Vault;
