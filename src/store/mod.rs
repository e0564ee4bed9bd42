//! Store Layer
//!
//! The synchronous key-value capability the request handler dispatches to,
//! plus the lookup and error plumbing around it:
//!
//! - [`Store`]: the four-operation contract (get / get_all / put / delete)
//! - [`StoreRepository`]: name -> store lookup, split into local and routed
//!   tables
//! - [`MemoryStore`]: the in-memory sharded engine
//! - [`StoreError`] / [`ErrorCodeMapper`]: categorized failures and their
//!   stable wire codes
//!
//! Stores synchronize internally; callers share them behind `Arc` and never
//! hold locks across a call.

pub mod error;
pub mod memory;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use crate::versioning::{Versioned, VectorClock};

pub use error::{ErrorCodeMapper, StoreError};
pub use memory::MemoryStore;

/// The synchronous key-value contract the request pipeline dispatches to.
///
/// Implementations are responsible for their own locking; every method may
/// be called from any selector thread.
pub trait Store: Send + Sync {
    /// The wire-visible store name.
    fn name(&self) -> &str;

    /// All current revisions of `key`; empty if the key is absent.
    fn get(&self, key: &Bytes) -> Result<Vec<Versioned>, StoreError>;

    /// Revisions for each of `keys` that is present. Each present key
    /// appears exactly once; absent keys are omitted.
    fn get_all(&self, keys: &[Bytes]) -> Result<HashMap<Bytes, Vec<Versioned>>, StoreError>;

    /// Stores a new revision of `key`.
    fn put(&self, key: Bytes, value: Versioned) -> Result<(), StoreError>;

    /// Removes the revisions of `key` that `version` descends; true if any
    /// revision was removed.
    fn delete(&self, key: &Bytes, version: &VectorClock) -> Result<bool, StoreError>;
}

/// Name -> store lookup shared by every connection.
///
/// Requests carry an `is_routed` flag selecting between the routed table
/// (operations that already passed through routing) and the local one. A
/// node without a routing tier registers its stores in both.
#[derive(Default)]
pub struct StoreRepository {
    local: RwLock<HashMap<String, Arc<dyn Store>>>,
    routed: RwLock<HashMap<String, Arc<dyn Store>>>,
}

impl StoreRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` in the local table under its own name.
    pub fn add_local(&self, store: Arc<dyn Store>) {
        if let Ok(mut table) = self.local.write() {
            table.insert(store.name().to_string(), store);
        }
    }

    /// Registers `store` in the routed table under its own name.
    pub fn add_routed(&self, store: Arc<dyn Store>) {
        if let Ok(mut table) = self.routed.write() {
            table.insert(store.name().to_string(), store);
        }
    }

    /// Looks up a store by name in the table the `routed` flag selects.
    pub fn get(&self, name: &str, routed: bool) -> Option<Arc<dyn Store>> {
        let table = if routed { &self.routed } else { &self.local };
        table.read().ok()?.get(name).cloned()
    }
}
