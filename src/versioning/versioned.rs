//! Causally-Tagged Values
//!
//! A [`Versioned`] pairs a value with the [`VectorClock`] that stamped the
//! write. Stores keep one `Versioned` per causal branch; concurrent writes
//! simply coexist until a later write descends from all of them.

use bytes::Bytes;

use super::clock::VectorClock;

/// One causally-tagged revision of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    clock: VectorClock,
    value: Bytes,
}

impl Versioned {
    /// Tags `value` with `clock`.
    pub fn new(clock: VectorClock, value: Bytes) -> Self {
        Self { clock, value }
    }

    /// The version token for this revision.
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// The payload bytes.
    pub fn value(&self) -> &Bytes {
        &self.value
    }
}
