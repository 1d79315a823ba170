//! `Vault`: the public façade. Orchestrates reads (cache-first, cold-
//! fallback), writes (optimistic + queued, or direct + durable), deletes,
//! and observable value streams (spec.md §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{Stream, StreamExt};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::backend::{PreferenceBackend, Snapshot};
use crate::cache::HotCache;
use crate::codec::{Codable, Codec, StoredValue};
use crate::coalescer::{WriteCoalescer, WriteOp};
use crate::crypto::CryptoEngine;
use crate::error::{ClearAllError, DeleteError, PutError, VaultError};
use crate::keystore::SecureKeyStore;
use crate::security::{self, SecurityProbes, ViolationCallback};
use crate::types::{MemoryPolicy, Namespace, VaultConfig};

const ENCRYPTED_PREFIX: &str = "encrypted_";

/// Public façade over `HotCache`, `CryptoEngine`, `WriteCoalescer`, and a
/// `PreferenceBackend`. One `Vault` owns one backend scope and one secure
/// key-store scope.
pub struct Vault {
    namespace: Option<Namespace>,
    memory_policy: MemoryPolicy,
    lazy_load: bool,
    cache: Arc<HotCache>,
    backend: Arc<dyn PreferenceBackend>,
    crypto: Arc<CryptoEngine>,
    coalescer: WriteCoalescer,
    observer: OnceCell<()>,
    observer_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Vault {
    /// Validates `config`, runs construction-time security posture probes,
    /// and wires the cache/crypto/coalescer/backend together. Must be
    /// called from within a Tokio runtime (the coalescer's consumer task,
    /// and — unless `lazy_load` is set — the snapshot observer, are
    /// spawned here).
    pub fn new(
        config: VaultConfig,
        backend: Arc<dyn PreferenceBackend>,
        key_store: Arc<dyn SecureKeyStore>,
    ) -> Result<Self, VaultError> {
        Self::new_with_probes(config, backend, key_store, SecurityProbes::default(), None)
    }

    pub fn new_with_probes(
        config: VaultConfig,
        backend: Arc<dyn PreferenceBackend>,
        key_store: Arc<dyn SecureKeyStore>,
        probes: SecurityProbes,
        on_warn: Option<ViolationCallback>,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        security::enforce(&config.security, &probes, on_warn.as_ref())?;

        let namespace = config.validated_namespace()?;
        let crypto = Arc::new(CryptoEngine::new(key_store, config.crypto.key_size));
        let cache = Arc::new(HotCache::new());
        let coalescer = WriteCoalescer::spawn(backend.clone(), crypto.clone(), config.coalescing.clone());

        let vault = Self {
            namespace,
            memory_policy: config.memory_policy,
            lazy_load: config.lazy_load,
            cache,
            backend,
            crypto,
            coalescer,
            observer: OnceCell::new(),
            observer_handle: StdMutex::new(None),
        };

        if !vault.lazy_load {
            vault.start_observer();
        }

        Ok(vault)
    }

    fn start_observer(&self) {
        let cache = self.cache.clone();
        let backend = self.backend.clone();
        let crypto = self.crypto.clone();
        let memory_policy = self.memory_policy;
        let namespace = self.namespace.clone();

        let handle = tokio::spawn(async move {
            let mut snapshots = backend.snapshots();
            while let Some(snapshot) = snapshots.next().await {
                let snapshot = match memory_policy {
                    MemoryPolicy::CiphertextInMemory => snapshot,
                    MemoryPolicy::PlaintextInMemory => {
                        decrypt_snapshot(&snapshot, &crypto, namespace.as_ref()).await
                    }
                };
                cache.apply_snapshot(&snapshot);
            }
        });

        *self.observer_handle.lock().unwrap() = Some(handle);
    }

    async fn ensure_observer_started(&self) {
        if !self.lazy_load {
            return;
        }
        self.observer
            .get_or_init(|| async {
                self.start_observer();
            })
            .await;
    }

    fn raw_key(key: &str, encrypted: bool) -> String {
        if encrypted {
            format!("{ENCRYPTED_PREFIX}{key}")
        } else {
            key.to_string()
        }
    }

    fn alias(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns.as_str(), key),
            None => key.to_string(),
        }
    }

    async fn ensure_warm(&self) {
        if self.cache.is_initialized() {
            return;
        }
        let snapshot = self.backend.current_snapshot().await;
        let snapshot = match self.memory_policy {
            MemoryPolicy::CiphertextInMemory => snapshot,
            MemoryPolicy::PlaintextInMemory => {
                decrypt_snapshot(&snapshot, &self.crypto, self.namespace.as_ref()).await
            }
        };
        self.cache.apply_snapshot(&snapshot);
    }

    /// Shared read-resolution: dispatches on `encrypted` to either a
    /// straight `Codec::decode` or the dual-interpretation algorithm of
    /// spec.md §4.6.
    async fn resolve<T: Codable>(&self, key: &str, default: T, encrypted: bool) -> T {
        let raw_key = Self::raw_key(key, encrypted);
        let stored = self.cache.get(&raw_key);
        if !encrypted {
            return Codec::decode(stored.as_ref(), default);
        }
        let alias = self.alias(key);
        resolve_encrypted(stored.as_ref(), &self.crypto, &alias, default).await
    }

    // -----------------------------------------------------------------
    // Direct (non-suspending) API
    // -----------------------------------------------------------------

    /// Non-suspending. Resolves from cache if initialized; otherwise forces
    /// one synchronous backend snapshot first. Never blocks on crypto
    /// beyond one decrypt for the requested key.
    pub fn get_direct<T: Codable>(&self, key: &str, default: T, encrypted: bool) -> T {
        if !self.cache.is_initialized() {
            futures::executor::block_on(self.ensure_warm());
        }
        futures::executor::block_on(self.resolve(key, default, encrypted))
    }

    /// Non-suspending. Computes the cached form (canonical plaintext, never
    /// ciphertext), marks the raw key dirty, updates the cache, and
    /// enqueues the write. Returns immediately after enqueue.
    pub fn put_direct<T: Codable>(&self, key: &str, value: T, encrypted: bool) {
        let raw_key = Self::raw_key(key, encrypted);
        let text = value.to_text();
        let cached = StoredValue::Str(text.clone());
        let stored_form = if encrypted { cached } else { Codec::encode(&value) };

        self.cache.mark_dirty(raw_key.clone());
        self.cache.put(raw_key, stored_form.clone());

        if encrypted {
            let alias = self.alias(key);
            self.coalescer.enqueue(WriteOp::Encrypted {
                key: key.to_string(),
                alias,
                plaintext: text,
            });
        } else {
            self.coalescer.enqueue(WriteOp::Unencrypted {
                key: key.to_string(),
                value: stored_form,
            });
        }
    }

    /// Non-suspending equivalent of `delete`: enqueues a `Delete` op,
    /// updates cache and `dirty` immediately.
    pub fn delete_direct(&self, key: &str) {
        let alias = self.alias(key);
        let plain_key = key.to_string();
        let enc_key = Self::raw_key(key, true);

        self.cache.mark_dirty(plain_key.clone());
        self.cache.mark_dirty(enc_key.clone());
        self.cache.remove(&plain_key);
        self.cache.remove(&enc_key);

        self.coalescer.enqueue(WriteOp::Delete { key: key.to_string(), alias });
    }

    // -----------------------------------------------------------------
    // Suspending API
    // -----------------------------------------------------------------

    /// Suspending variant of `get_direct` that awaits (rather than blocks)
    /// for cold-cache initialization.
    pub async fn get<T: Codable>(&self, key: &str, default: T, encrypted: bool) -> T {
        self.ensure_observer_started().await;
        self.ensure_warm().await;
        self.resolve(key, default, encrypted).await
    }

    /// Suspending. Commits directly to the backend in one edit and updates
    /// the cache with the canonical plaintext form. Completes only after
    /// durable commit; a subsequent `get` on any thread returns what was
    /// written.
    pub async fn put<T: Codable>(&self, key: &str, value: T, encrypted: bool) -> Result<(), PutError> {
        self.ensure_observer_started().await;

        let text = value.to_text();
        let raw_key = Self::raw_key(key, encrypted);

        // What lands in the cache: the encrypted branch always caches the
        // canonical plaintext text (never ciphertext, per spec.md §4.6);
        // the unencrypted branch caches the same native `StoredValue` the
        // backend commits, so non-string primitives decode correctly on
        // the next `get` instead of falling back to `default`.
        let cached = if encrypted {
            StoredValue::Str(text.clone())
        } else {
            Codec::encode(&value)
        };

        if encrypted {
            let alias = self.alias(key);
            let ciphertext = self.crypto.encrypt(&alias, text.as_bytes()).await?;
            let encoded = BASE64.encode(ciphertext);
            self.backend
                .edit(Box::new({
                    let raw_key = raw_key.clone();
                    move |edit| edit.put(raw_key, StoredValue::Str(encoded))
                }))
                .await
                .map_err(PutError)?;
        } else {
            self.backend
                .edit(Box::new({
                    let raw_key = raw_key.clone();
                    let stored = cached.clone();
                    move |edit| edit.put(raw_key, stored)
                }))
                .await
                .map_err(PutError)?;
        }

        self.cache.mark_dirty(raw_key.clone());
        self.cache.put(raw_key, cached);
        Ok(())
    }

    /// Suspending. Single-op edit removing both `key` and
    /// `"encrypted_"+key`; deletes the alias's key outside that edit;
    /// updates cache.
    pub async fn delete(&self, key: &str) -> Result<(), DeleteError> {
        self.ensure_observer_started().await;

        let plain_key = key.to_string();
        let enc_key = Self::raw_key(key, true);

        self.backend
            .edit(Box::new({
                let plain_key = plain_key.clone();
                let enc_key = enc_key.clone();
                move |edit| {
                    edit.remove(&plain_key);
                    edit.remove(&enc_key);
                }
            }))
            .await
            .map_err(DeleteError)?;

        let alias = self.alias(key);
        self.crypto.delete_key(&alias).await.map_err(DeleteError)?;

        self.cache.mark_dirty(plain_key.clone());
        self.cache.mark_dirty(enc_key.clone());
        self.cache.remove(&plain_key);
        self.cache.remove(&enc_key);
        Ok(())
    }

    /// Suspending. Clears the backend, clears every key the `CryptoEngine`
    /// currently knows about, and empties the cache.
    pub async fn clear_all(&self) -> Result<(), ClearAllError> {
        self.ensure_observer_started().await;

        let snapshot = self.backend.current_snapshot().await;
        let keys: Vec<String> = snapshot.keys().cloned().collect();
        self.backend
            .edit(Box::new(move |edit| {
                for key in keys {
                    edit.remove(&key);
                }
            }))
            .await
            .map_err(ClearAllError)?;

        self.crypto.clear_all().await.map_err(ClearAllError)?;
        self.cache.clear();
        Ok(())
    }

    /// Restartable lazy sequence: emits the current value (default if
    /// absent), then a new value on every distinct subsequent change. For
    /// unencrypted keys this is derived directly from backend snapshots;
    /// for encrypted keys each snapshot is decrypted before comparison.
    pub fn get_flow<T>(
        &self,
        key: &str,
        default: T,
        encrypted: bool,
    ) -> std::pin::Pin<Box<dyn Stream<Item = T> + Send>>
    where
        T: Codable + PartialEq + Send + 'static,
    {
        let raw_key = Self::raw_key(key, encrypted);
        let alias = self.alias(key);
        let crypto = self.crypto.clone();
        let snapshots = self.backend.snapshots();

        let decoded = snapshots.then(move |snapshot| {
            let crypto = crypto.clone();
            let alias = alias.clone();
            let raw_key = raw_key.clone();
            let default = default.clone();
            async move {
                let stored = snapshot.get(&raw_key).cloned();
                if encrypted {
                    resolve_encrypted(stored.as_ref(), &crypto, &alias, default).await
                } else {
                    Codec::decode(stored.as_ref(), default)
                }
            }
        });

        let mut last: Option<T> = None;
        Box::pin(decoded.filter_map(move |value| {
            let changed = last.as_ref() != Some(&value);
            if changed {
                last = Some(value.clone());
            }
            futures::future::ready(if changed { Some(value) } else { None })
        }))
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        self.coalescer.abort();
        if let Some(handle) = self.observer_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Dual-interpretation read resolution for an `"encrypted_"`-prefixed raw
/// cache entry (spec.md §4.6): try the stored string as canonical plaintext
/// first (cheap, bounds the hot path to one parse); if that fails, try
/// base64-decode → `CryptoEngine::decrypt` → textual decode. On every
/// failure, return `default`.
async fn resolve_encrypted<T: Codable>(
    stored: Option<&StoredValue>,
    crypto: &CryptoEngine,
    alias: &str,
    default: T,
) -> T {
    let text = match stored.and_then(StoredValue::as_str) {
        Some(text) => text,
        None => return default,
    };

    if let Some(value) = T::from_text(text) {
        return value;
    }

    if let Ok(bytes) = BASE64.decode(text) {
        if let Ok(plaintext) = crypto.decrypt(alias, &bytes).await {
            if let Ok(plaintext_text) = String::from_utf8(plaintext) {
                if let Some(value) = T::from_text(&plaintext_text) {
                    return value;
                }
            }
        }
    }

    default
}

/// Under `MemoryPolicy::PlaintextInMemory`, decrypts every
/// `"encrypted_"`-prefixed entry in a freshly observed snapshot before it
/// reaches `HotCache::apply_snapshot`, so warm reads are pure memory.
/// Entries that fail to decrypt (corrupted ciphertext, alias not yet known
/// to this process) are left as the raw ciphertext string; the read path's
/// dual-interpretation serves as a fallback for those.
async fn decrypt_snapshot(
    snapshot: &Snapshot,
    crypto: &CryptoEngine,
    namespace: Option<&Namespace>,
) -> Snapshot {
    let encrypted_keys: Vec<String> = snapshot
        .keys()
        .filter(|k| k.starts_with(ENCRYPTED_PREFIX))
        .cloned()
        .collect();

    if encrypted_keys.is_empty() {
        return snapshot.clone();
    }

    let mut out: HashMap<String, StoredValue> = (**snapshot).clone();
    for raw_key in encrypted_keys {
        let Some(StoredValue::Str(text)) = out.get(&raw_key).cloned() else {
            continue;
        };
        let client_key = &raw_key[ENCRYPTED_PREFIX.len()..];
        let alias = match namespace {
            Some(ns) => format!("{}:{}", ns.as_str(), client_key),
            None => client_key.to_string(),
        };
        if let Ok(bytes) = BASE64.decode(&text) {
            if let Ok(plaintext) = crypto.decrypt(&alias, &bytes).await {
                if let Ok(plaintext_text) = String::from_utf8(plaintext) {
                    out.insert(raw_key, StoredValue::Str(plaintext_text));
                }
            }
        }
    }
    Arc::new(out)
}
