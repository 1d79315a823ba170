//! `HotCache`: the concurrent in-memory view the vault reads and writes
//! through. Mechanical and policy-agnostic — it knows nothing about
//! namespaces, encryption, or memory policy; it only ever sees raw cache
//! keys and `StoredValue`s (spec.md §4.4).

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::{DashMap, DashSet};

use crate::backend::Snapshot;
use crate::codec::StoredValue;

/// Concurrent in-memory map from raw cache key to cached value, plus an
/// "initialized" flag and an additive set of dirty keys.
pub struct HotCache {
    entries: DashMap<String, StoredValue>,
    dirty: DashSet<String>,
    initialized: AtomicBool,
}

impl Default for HotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HotCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            dirty: DashSet::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Lock-free lookup.
    pub fn get(&self, raw_key: &str) -> Option<StoredValue> {
        self.entries.get(raw_key).map(|r| r.clone())
    }

    pub fn put(&self, raw_key: impl Into<String>, value: StoredValue) {
        self.entries.insert(raw_key.into(), value);
    }

    pub fn remove(&self, raw_key: &str) {
        self.entries.remove(raw_key);
    }

    /// Additive only: entries are never cleared here. A raw key in `dirty`
    /// means "a local write has been enqueued and its observed state on
    /// disk may lag; trust the cache, not incoming snapshots" — clearing it
    /// on snapshot application would let a stale, in-flight snapshot
    /// overwrite a newer cached value (spec.md §4.4, §4.5).
    pub fn mark_dirty(&self, raw_key: impl Into<String>) {
        self.dirty.insert(raw_key.into());
    }

    pub fn is_dirty(&self, raw_key: &str) -> bool {
        self.dirty.contains(raw_key)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Empties both `entries` and `dirty`. Unlike `apply_snapshot`, this is
    /// not additive — used by `Vault::clear_all`, where every previously
    /// dirty key must actually disappear rather than be preserved against
    /// the snapshot that was just cleared to.
    pub fn clear(&self) {
        self.entries.clear();
        self.dirty.clear();
    }

    /// For each key in the snapshot: if it is dirty, preserve the cached
    /// value; else overwrite the cache entry from the snapshot. Remove
    /// cached entries whose raw keys are present in neither the snapshot
    /// nor `dirty`. Sets `initialized` to true (idempotent across repeated
    /// calls — the first invocation is the one that matters).
    pub fn apply_snapshot(&self, snapshot: &Snapshot) {
        for entry in snapshot.iter() {
            let (key, value) = entry;
            if self.dirty.contains(key) {
                continue;
            }
            self.entries.insert(key.clone(), value.clone());
        }

        let stale: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| !snapshot.contains_key(k) && !self.dirty.contains(k))
            .collect();
        for key in stale {
            self.entries.remove(&key);
        }

        self.initialized.store(true, Ordering::Release);
    }
}
