//! `CryptoEngine`: per-alias symmetric AEAD encryption with race-free lazy
//! key generation. AES-GCM with a 96-bit random nonce is the only cipher —
//! per spec.md §4.2 the algorithm is not a policy knob, only the key size
//! (128 or 256 bits) is configurable.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use dashmap::DashMap;
use getrandom::getrandom;
use tokio::sync::Mutex as AsyncMutex;
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::keystore::SecureKeyStore;
use crate::types::KeySize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A cached per-alias symmetric key. Boxed in an `Arc` so cache hits clone
/// a reference rather than the key bytes themselves.
#[derive(Clone)]
enum AeadKey {
    Bits128(Arc<Zeroizing<[u8; 16]>>),
    Bits256(Arc<Zeroizing<[u8; 32]>>),
}

/// Per-identifier symmetric AEAD. Lazily generates, caches, and deletes
/// per-alias keys; guarantees at-most-one generation per alias under
/// concurrent access via a per-alias lock token that is never interned in
/// a process-global pool (spec.md §4.2, §5, §9).
pub struct CryptoEngine {
    store: Arc<dyn SecureKeyStore>,
    key_size: KeySize,
    cache: DashMap<String, AeadKey>,
    /// Per-alias lock tokens, created on demand via compute-if-absent. This
    /// map is owned by this `CryptoEngine` instance alone; two engines
    /// never share lock identity for the same alias string.
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl CryptoEngine {
    pub fn new(store: Arc<dyn SecureKeyStore>, key_size: KeySize) -> Self {
        Self {
            store,
            key_size,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, alias: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(alias.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn key_from_bytes(key_size: KeySize, bytes: &[u8]) -> Result<AeadKey, VaultError> {
        match key_size {
            KeySize::Bits128 => {
                let arr: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| VaultError::CryptoUnavailable("stored key has wrong length".into()))?;
                Ok(AeadKey::Bits128(Arc::new(Zeroizing::new(arr))))
            }
            KeySize::Bits256 => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| VaultError::CryptoUnavailable("stored key has wrong length".into()))?;
                Ok(AeadKey::Bits256(Arc::new(Zeroizing::new(arr))))
            }
        }
    }

    fn generate_bytes(key_size: KeySize) -> Result<Vec<u8>, VaultError> {
        let mut bytes = vec![0u8; key_size.byte_len()];
        getrandom(&mut bytes)
            .map_err(|e| VaultError::CryptoUnavailable(format!("rng unavailable: {e}")))?;
        Ok(bytes)
    }

    /// (1) lock-free cache check; (2) acquire the alias's lock; (3) re-check
    /// cache; (4) read from the key store; (5) if absent, generate, persist,
    /// then cache. A transient store error here is surfaced as
    /// `CryptoUnavailable` and MUST NOT trigger silent regeneration — that
    /// would orphan ciphertexts written under whatever key already exists.
    pub async fn get_or_create(&self, alias: &str) -> Result<(), VaultError> {
        if self.cache.contains_key(alias) {
            return Ok(());
        }
        let lock = self.lock_for(alias);
        let _guard = lock.lock().await;
        if self.cache.contains_key(alias) {
            return Ok(());
        }
        match self.store.get(alias).await? {
            Some(bytes) => {
                let key = Self::key_from_bytes(self.key_size, &bytes)?;
                self.cache.insert(alias.to_string(), key);
            }
            None => {
                let bytes = Self::generate_bytes(self.key_size)?;
                self.store.put(alias, &bytes).await?;
                let key = Self::key_from_bytes(self.key_size, &bytes)?;
                self.cache.insert(alias.to_string(), key);
                tracing::info!(alias, "generated new per-alias key");
            }
        }
        Ok(())
    }

    /// Removes cache and persistent copies atomically with respect to the
    /// alias's lock; idempotent. The same lock as `get_or_create` is held
    /// so a concurrent creation cannot repopulate a just-deleted alias.
    pub async fn delete_key(&self, alias: &str) -> Result<(), VaultError> {
        let lock = self.lock_for(alias);
        let _guard = lock.lock().await;
        self.cache.remove(alias);
        self.store.delete(alias).await?;
        tracing::info!(alias, "deleted per-alias key");
        Ok(())
    }

    /// Removes every alias this engine currently has a cached key for, both
    /// in-memory and from the backing store. Used by `Vault::clear_all`.
    pub async fn clear_all(&self) -> Result<(), VaultError> {
        let aliases: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        for alias in aliases {
            self.delete_key(&alias).await?;
        }
        Ok(())
    }

    /// `nonce(12) || ciphertext || tag(16)`, consumed as one contiguous
    /// buffer.
    pub async fn encrypt(&self, alias: &str, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        self.get_or_create(alias).await?;
        let key = self
            .cache
            .get(alias)
            .map(|r| r.clone())
            .expect("key was just created or already cached");

        let mut nonce = [0u8; NONCE_LEN];
        getrandom(&mut nonce)
            .map_err(|e| VaultError::CryptoUnavailable(format!("rng unavailable: {e}")))?;
        let n = Nonce::from_slice(&nonce);

        let ciphertext = match &key {
            AeadKey::Bits128(k) => {
                let cipher = Aes128Gcm::new_from_slice(k.as_ref().as_slice())
                    .map_err(|_| VaultError::CryptoUnavailable("bad key length".into()))?;
                cipher
                    .encrypt(n, plaintext)
                    .map_err(|_| VaultError::CryptoUnavailable("encryption failed".into()))?
            }
            AeadKey::Bits256(k) => {
                let cipher = Aes256Gcm::new_from_slice(k.as_ref().as_slice())
                    .map_err(|_| VaultError::CryptoUnavailable("bad key length".into()))?;
                cipher
                    .encrypt(n, plaintext)
                    .map_err(|_| VaultError::CryptoUnavailable("encryption failed".into()))?
            }
        };

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Fails with `KeyNotFound` for an alias this engine has never seen
    /// (neither cached nor present in the key store) rather than lazily
    /// generating one — decrypting against a fresh key can never succeed
    /// and would only mask the real error.
    pub async fn decrypt(&self, alias: &str, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::DecryptFailed);
        }

        let key = if let Some(k) = self.cache.get(alias) {
            k.clone()
        } else {
            match self.store.get(alias).await? {
                Some(bytes) => {
                    let key = Self::key_from_bytes(self.key_size, &bytes)?;
                    self.cache.insert(alias.to_string(), key.clone());
                    key
                }
                None => return Err(VaultError::KeyNotFound(alias.to_string())),
            }
        };

        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let n = Nonce::from_slice(nonce);

        match &key {
            AeadKey::Bits128(k) => {
                let cipher = Aes128Gcm::new_from_slice(k.as_ref().as_slice())
                    .map_err(|_| VaultError::DecryptFailed)?;
                cipher.decrypt(n, body).map_err(|_| VaultError::DecryptFailed)
            }
            AeadKey::Bits256(k) => {
                let cipher = Aes256Gcm::new_from_slice(k.as_ref().as_slice())
                    .map_err(|_| VaultError::DecryptFailed)?;
                cipher.decrypt(n, body).map_err(|_| VaultError::DecryptFailed)
            }
        }
    }
}
