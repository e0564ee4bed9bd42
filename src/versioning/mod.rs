//! Versioning Primitives
//!
//! Vector clocks and the (clock, value) pairs the store deals in. The clock
//! wire format is self-describing in length, which the request handler
//! relies on to split the concatenated `clock || value` blob a PUT carries.
//!
//! - [`clock`]: the `VectorClock` codec and causal comparison
//! - [`versioned`]: the `Versioned` revision pair

pub mod clock;
pub mod versioned;

pub use clock::{Causality, ClockError, VectorClock, MAX_CLOCK_ENTRIES};
pub use versioned::Versioned;
