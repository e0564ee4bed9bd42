//! In-Memory Versioned Store
//!
//! The node's default storage engine: a sharded, thread-safe map from key
//! to the list of causally-concurrent revisions of that key.
//!
//! ## Concurrency Model
//!
//! Keys are distributed across independent `RwLock`-guarded shards by hash,
//! so connections touching different keys rarely contend. A single selector
//! thread calls in synchronously; the sharding is what keeps a future
//! multi-selector deployment honest.
//!
//! ## Version Semantics
//!
//! Each key holds the frontier of its causal history:
//!
//! - `put` rejects a write whose clock an existing revision already
//!   descends (the writer is working from stale state), prunes revisions
//!   the new clock descends, and keeps genuinely concurrent ones.
//! - `delete` removes every revision the given clock descends and reports
//!   whether anything was removed.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::RwLock;

use bytes::Bytes;

use crate::versioning::{Versioned, VectorClock};

use super::error::StoreError;
use super::Store;

/// Shard count; a power of two keeps the modulo cheap.
const NUM_SHARDS: usize = 16;

/// A sharded in-memory map of key -> concurrent revisions.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    shards: Vec<RwLock<HashMap<Bytes, Vec<Versioned>>>>,
}

impl MemoryStore {
    /// Creates an empty store with the given wire-visible name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &Bytes) -> &RwLock<HashMap<Bytes, Vec<Versioned>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("store lock poisoned".to_string())
    }

    /// Total number of keys across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().map(|m| m.len()).unwrap_or(0))
            .sum()
    }

    /// True when no key holds any revision.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &Bytes) -> Result<Vec<Versioned>, StoreError> {
        let shard = self.shard(key).read().map_err(|_| Self::poisoned())?;
        Ok(shard.get(key).cloned().unwrap_or_default())
    }

    fn get_all(
        &self,
        keys: &[Bytes],
    ) -> Result<HashMap<Bytes, Vec<Versioned>>, StoreError> {
        let mut results = HashMap::new();
        for key in keys {
            // Only keys that currently hold revisions appear in the result.
            let versions = self.get(key)?;
            if !versions.is_empty() {
                results.entry(key.clone()).or_insert(versions);
            }
        }
        Ok(results)
    }

    fn put(&self, key: Bytes, value: Versioned) -> Result<(), StoreError> {
        let mut shard = self.shard(&key).write().map_err(|_| Self::poisoned())?;
        let versions = shard.entry(key).or_default();

        for existing in versions.iter() {
            if existing.clock().descends(value.clock()) {
                return Err(StoreError::ObsoleteVersion(format!(
                    "version {} is obsoleted by an existing version",
                    value.clock()
                )));
            }
        }

        // The new revision supersedes everything it descends; concurrent
        // revisions stay on the frontier.
        versions.retain(|existing| !value.clock().descends(existing.clock()));
        versions.push(value);
        Ok(())
    }

    fn delete(&self, key: &Bytes, version: &VectorClock) -> Result<bool, StoreError> {
        let mut shard = self.shard(key).write().map_err(|_| Self::poisoned())?;
        let Some(versions) = shard.get_mut(key) else {
            return Ok(false);
        };

        let before = versions.len();
        versions.retain(|existing| !version.descends(existing.clock()));
        let deleted = versions.len() < before;

        if versions.is_empty() {
            shard.remove(key);
        }
        Ok(deleted)
    }
}
