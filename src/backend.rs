//! `PreferenceBackend`: the durable, typed, single-writer map the vault
//! persists into. Treated elsewhere in this crate as an opaque external
//! collaborator (per spec); this module supplies the trait plus two
//! concrete, testable implementations so the crate's own test suite has
//! something real to exercise.

use crate::codec::StoredValue;
use crate::error::VaultError;

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use futures::stream::{Stream, StreamExt};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

/// An immutable point-in-time view of every key currently in the backend.
pub type Snapshot = std::sync::Arc<HashMap<String, StoredValue>>;

/// Mutation surface passed to `PreferenceBackend::edit`. A single `edit`
/// call commits every mutation applied through this builder as one atomic
/// batch.
pub struct Edit<'a> {
    map: &'a mut HashMap<String, StoredValue>,
}

impl<'a> Edit<'a> {
    pub fn put(&mut self, key: impl Into<String>, value: StoredValue) {
        self.map.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) {
        self.map.remove(key);
    }
}

/// Durable ordered map from string keys to typed primitives, with an
/// observable snapshot stream. Single-writer, multi-reader; a single
/// `edit` commits all its mutations together.
#[async_trait::async_trait]
pub trait PreferenceBackend: Send + Sync {
    /// One-shot current snapshot.
    async fn current_snapshot(&self) -> Snapshot;

    /// Apply `mutate` to a fresh snapshot and commit atomically. Serial
    /// per instance: concurrent callers observe edits in some total order.
    async fn edit(
        &self,
        mutate: Box<dyn FnOnce(&mut Edit<'_>) + Send>,
    ) -> Result<(), VaultError>;

    /// A restartable lazy sequence producing a fresh snapshot whenever the
    /// durable state changes, starting with the current state. Emission on
    /// the writer's own edit is best-effort and may be arbitrarily delayed.
    fn snapshots(&self) -> Pin<Box<dyn Stream<Item = Snapshot> + Send>>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory preference backend, for testing and ephemeral use.
pub struct InMemoryPreferenceBackend {
    state: RwLock<HashMap<String, StoredValue>>,
    changes: broadcast::Sender<Snapshot>,
}

impl InMemoryPreferenceBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl Default for InMemoryPreferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PreferenceBackend for InMemoryPreferenceBackend {
    async fn current_snapshot(&self) -> Snapshot {
        std::sync::Arc::new(self.state.read().await.clone())
    }

    async fn edit(
        &self,
        mutate: Box<dyn FnOnce(&mut Edit<'_>) + Send>,
    ) -> Result<(), VaultError> {
        let snapshot = {
            let mut guard = self.state.write().await;
            let mut edit = Edit { map: &mut guard };
            mutate(&mut edit);
            std::sync::Arc::new(guard.clone())
        };
        // Best-effort: no receivers is not an error, matching the spec's
        // "emission on the writer's own edit is best-effort" language.
        let _ = self.changes.send(snapshot);
        Ok(())
    }

    fn snapshots(&self) -> Pin<Box<dyn Stream<Item = Snapshot> + Send>> {
        let initial = snapshot_best_effort(&self.state);
        let rx = self.changes.subscribe();
        let live = BroadcastStream::new(rx).filter_map(|r| async move { r.ok() });
        Box::pin(tokio_stream::once(initial).chain(live))
    }
}

/// Synchronously snapshot the current state for use as the first element of
/// `snapshots()`. `try_read` never blocks; under the rare contention where a
/// writer briefly holds the lock, we fall back to an empty snapshot — the
/// writer's own commit will emit a fresh one immediately after.
fn snapshot_best_effort(state: &RwLock<HashMap<String, StoredValue>>) -> Snapshot {
    match state.try_read() {
        Ok(guard) => std::sync::Arc::new(guard.clone()),
        Err(_) => std::sync::Arc::new(HashMap::new()),
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-based preference backend: one JSON document per namespace.
///
/// Directory layout:
/// ```text
/// {dir}/{namespace}.json
/// ```
pub struct FilePreferenceBackend {
    path: PathBuf,
    state: RwLock<HashMap<String, StoredValue>>,
    changes: broadcast::Sender<Snapshot>,
}

impl FilePreferenceBackend {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let path = path.into();
        let state = if path.exists() {
            Self::read_file(&path)?
        } else {
            HashMap::new()
        };
        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            path,
            state: RwLock::new(state),
            changes,
        })
    }

    fn read_file(path: &PathBuf) -> Result<HashMap<String, StoredValue>, VaultError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| VaultError::BackendCommitFailed(format!("read: {}", e)))?;
        let wire: HashMap<String, WireValue> = serde_json::from_str(&data)
            .map_err(|e| VaultError::BackendCommitFailed(format!("parse: {}", e)))?;
        Ok(wire.into_iter().map(|(k, v)| (k, v.into())).collect())
    }

    fn write_file(path: &PathBuf, map: &HashMap<String, StoredValue>) -> Result<(), VaultError> {
        let wire: HashMap<&str, WireValue> =
            map.iter().map(|(k, v)| (k.as_str(), WireValue::from(v))).collect();
        let json = serde_json::to_string_pretty(&wire)
            .map_err(|e| VaultError::BackendCommitFailed(format!("serialize: {}", e)))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| VaultError::BackendCommitFailed(format!("write: {}", e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| VaultError::BackendCommitFailed(format!("rename: {}", e)))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PreferenceBackend for FilePreferenceBackend {
    async fn current_snapshot(&self) -> Snapshot {
        std::sync::Arc::new(self.state.read().await.clone())
    }

    async fn edit(
        &self,
        mutate: Box<dyn FnOnce(&mut Edit<'_>) + Send>,
    ) -> Result<(), VaultError> {
        let snapshot = {
            let mut guard = self.state.write().await;
            let mut edit = Edit { map: &mut guard };
            mutate(&mut edit);
            Self::write_file(&self.path, &guard)?;
            std::sync::Arc::new(guard.clone())
        };
        let _ = self.changes.send(snapshot);
        Ok(())
    }

    fn snapshots(&self) -> Pin<Box<dyn Stream<Item = Snapshot> + Send>> {
        let initial = snapshot_best_effort(&self.state);
        let rx = self.changes.subscribe();
        let live = BroadcastStream::new(rx).filter_map(|r| async move { r.ok() });
        Box::pin(tokio_stream::once(initial).chain(live))
    }
}

/// On-disk representation of `StoredValue` (serde can't derive for the enum
/// directly without exposing an untagged ambiguity between `I32`/`I64` and
/// `F32`/`F64`; this wire type disambiguates explicitly).
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "t", content = "v")]
enum WireValue {
    #[serde(rename = "b")]
    Bool(bool),
    #[serde(rename = "i32")]
    I32(i32),
    #[serde(rename = "i64")]
    I64(i64),
    #[serde(rename = "f32")]
    F32(f32),
    #[serde(rename = "f64")]
    F64(f64),
    #[serde(rename = "s")]
    Str(String),
}

impl From<&StoredValue> for WireValue {
    fn from(v: &StoredValue) -> Self {
        match v {
            StoredValue::Bool(b) => WireValue::Bool(*b),
            StoredValue::I32(v) => WireValue::I32(*v),
            StoredValue::I64(v) => WireValue::I64(*v),
            StoredValue::F32(v) => WireValue::F32(*v),
            StoredValue::F64(v) => WireValue::F64(*v),
            StoredValue::Str(s) => WireValue::Str(s.clone()),
        }
    }
}

impl From<WireValue> for StoredValue {
    fn from(v: WireValue) -> Self {
        match v {
            WireValue::Bool(b) => StoredValue::Bool(b),
            WireValue::I32(v) => StoredValue::I32(v),
            WireValue::I64(v) => StoredValue::I64(v),
            WireValue::F32(v) => StoredValue::F32(v),
            WireValue::F64(v) => StoredValue::F64(v),
            WireValue::Str(s) => StoredValue::Str(s),
        }
    }
}
