//! `WriteCoalescer`: an unbounded queue of pending write operations with a
//! background consumer that batches operations within a short window and
//! commits them via one `PreferenceBackend::edit` (spec.md §4.5).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::PreferenceBackend;
use crate::codec::StoredValue;
use crate::crypto::CryptoEngine;
use crate::types::CoalescingConfig;

/// One pending mutation, as enqueued by `Vault::put_direct` /
/// `Vault::delete_direct`. `key` is always the *client* key, never a raw
/// cache key — the coalescer derives both `"encrypted_"`-prefixed forms
/// itself when committing, so a `Delete` always clears both.
pub enum WriteOp {
    Unencrypted { key: String, value: StoredValue },
    Encrypted { key: String, alias: String, plaintext: String },
    Delete { key: String, alias: String },
}

const ENCRYPTED_PREFIX: &str = "encrypted_";

enum ResolvedOp {
    Put(String, StoredValue),
    Remove(String),
}

pub struct WriteCoalescer {
    tx: mpsc::UnboundedSender<WriteOp>,
    consumer: JoinHandle<()>,
}

impl WriteCoalescer {
    pub fn spawn(
        backend: Arc<dyn PreferenceBackend>,
        crypto: Arc<CryptoEngine>,
        config: CoalescingConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(Self::run(rx, backend, crypto, config));
        Self { tx, consumer }
    }

    /// Non-blocking; the enqueuer is never blocked by backend I/O or crypto.
    pub fn enqueue(&self, op: WriteOp) {
        // A send error means the consumer task has already shut down
        // (vault dropped); the optimistic cache write already happened, so
        // there is nothing further to do.
        let _ = self.tx.send(op);
    }

    pub fn abort(&self) {
        self.consumer.abort();
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<WriteOp>,
        backend: Arc<dyn PreferenceBackend>,
        crypto: Arc<CryptoEngine>,
        config: CoalescingConfig,
    ) {
        loop {
            let first = match rx.recv().await {
                Some(op) => op,
                None => return,
            };
            let mut batch = vec![first];
            let deadline = Instant::now() + config.window;

            while batch.len() < config.batch_cap {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                tokio::select! {
                    biased;
                    maybe_op = rx.recv() => {
                        match maybe_op {
                            Some(op) => batch.push(op),
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(remaining) => break,
                }
            }

            Self::commit_batch(&backend, &crypto, batch).await;
        }
    }

    async fn commit_batch(
        backend: &Arc<dyn PreferenceBackend>,
        crypto: &Arc<CryptoEngine>,
        ops: Vec<WriteOp>,
    ) {
        let mut resolved = Vec::with_capacity(ops.len());
        let mut post_commit_key_deletes = Vec::new();

        // Encryption happens here, on the consumer task, never on the
        // enqueuer. Operations targeting the same raw key take
        // last-write-wins semantics simply by being applied, in arrival
        // order, onto the same backing map inside one `edit`.
        for op in ops {
            match op {
                WriteOp::Unencrypted { key, value } => {
                    resolved.push(ResolvedOp::Put(key, value));
                }
                WriteOp::Encrypted { key, alias, plaintext } => {
                    match crypto.encrypt(&alias, plaintext.as_bytes()).await {
                        Ok(ciphertext) => {
                            let encoded = base64_encode(&ciphertext);
                            resolved.push(ResolvedOp::Put(
                                format!("{ENCRYPTED_PREFIX}{key}"),
                                StoredValue::Str(encoded),
                            ));
                        }
                        Err(err) => {
                            tracing::warn!(key, error = %err, "encrypt failed in coalesced batch; op dropped");
                        }
                    }
                }
                WriteOp::Delete { key, alias } => {
                    resolved.push(ResolvedOp::Remove(key.clone()));
                    resolved.push(ResolvedOp::Remove(format!("{ENCRYPTED_PREFIX}{key}")));
                    post_commit_key_deletes.push(alias);
                }
            }
        }

        if resolved.is_empty() {
            return;
        }

        let count = resolved.len();
        let result = backend
            .edit(Box::new(move |edit| {
                for op in resolved {
                    match op {
                        ResolvedOp::Put(k, v) => edit.put(k, v),
                        ResolvedOp::Remove(k) => edit.remove(&k),
                    }
                }
            }))
            .await;

        match result {
            Ok(()) => tracing::debug!(ops = count, "coalesced batch committed"),
            Err(err) => {
                // Dropped with a diagnostic; optimistic cache values remain.
                // The caller's next successful write is how convergence
                // happens — per spec.md §4.5/§7 this is not retried here.
                tracing::error!(error = %err, "coalesced batch commit failed; dropped");
                return;
            }
        }

        // Outside the backend edit: the secure key store is a separate
        // subsystem (spec.md §4.5).
        for alias in post_commit_key_deletes {
            if let Err(err) = crypto.delete_key(&alias).await {
                tracing::warn!(alias, error = %err, "key deletion after batch commit failed");
            }
        }
    }
}

impl Drop for WriteCoalescer {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryPreferenceBackend;
    use crate::keystore::InMemorySecureKeyStore;
    use crate::types::KeySize;
    use std::time::Duration;

    fn fast_config() -> CoalescingConfig {
        CoalescingConfig {
            batch_cap: 50,
            window: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn unencrypted_write_lands_in_backend() {
        let backend = Arc::new(InMemoryPreferenceBackend::new());
        let crypto = Arc::new(CryptoEngine::new(Arc::new(InMemorySecureKeyStore::new()), KeySize::Bits256));
        let coalescer = WriteCoalescer::spawn(backend.clone(), crypto, fast_config());

        coalescer.enqueue(WriteOp::Unencrypted {
            key: "k".to_string(),
            value: StoredValue::I32(42),
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let snap = backend.current_snapshot().await;
        assert_eq!(snap.get("k"), Some(&StoredValue::I32(42)));
    }

    #[tokio::test]
    async fn same_key_batch_is_last_write_wins() {
        let backend = Arc::new(InMemoryPreferenceBackend::new());
        let crypto = Arc::new(CryptoEngine::new(Arc::new(InMemorySecureKeyStore::new()), KeySize::Bits256));
        let coalescer = WriteCoalescer::spawn(backend.clone(), crypto, fast_config());

        for i in 0..5 {
            coalescer.enqueue(WriteOp::Unencrypted {
                key: "k".to_string(),
                value: StoredValue::I32(i),
            });
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        let snap = backend.current_snapshot().await;
        assert_eq!(snap.get("k"), Some(&StoredValue::I32(4)));
    }

    #[tokio::test]
    async fn delete_removes_both_raw_forms_and_deletes_key() {
        let backend = Arc::new(InMemoryPreferenceBackend::new());
        let key_store = Arc::new(InMemorySecureKeyStore::new());
        let crypto = Arc::new(CryptoEngine::new(key_store.clone(), KeySize::Bits256));
        crypto.encrypt("alias", b"seed").await.unwrap();
        assert!(key_store.get("alias").await.unwrap().is_some());

        backend
            .edit(Box::new(|e| {
                e.put("k", StoredValue::I32(1));
                e.put("encrypted_k", StoredValue::Str("x".into()));
            }))
            .await
            .unwrap();

        let coalescer = WriteCoalescer::spawn(backend.clone(), crypto, fast_config());
        coalescer.enqueue(WriteOp::Delete {
            key: "k".to_string(),
            alias: "alias".to_string(),
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let snap = backend.current_snapshot().await;
        assert_eq!(snap.get("k"), None);
        assert_eq!(snap.get("encrypted_k"), None);
        assert!(key_store.get("alias").await.unwrap().is_none());
    }
}
