//! Native Binary Protocol
//!
//! The wire protocol a client speaks to this node. A request is
//!
//! ```text
//! opCode: u8 | storeName: utf | isRouted: u8 | opcode-specific payload
//! ```
//!
//! and a response is an `i16` status word - zero followed by the success
//! payload, or a nonzero error code followed by a UTF message.
//!
//! ## Modules
//!
//! - [`wire`]: big-endian primitives shared by every protocol layer
//! - [`framer`]: measures one complete request in a partially filled buffer
//! - [`handler`]: parses a framed request and drives the store
//!
//! Framing and handling are deliberately split: the framer runs on every
//! socket read and only measures length, so a half-arrived request costs a
//! cheap byte walk, not a failed parse.

pub mod framer;
pub mod handler;
pub mod wire;

pub use framer::{frame, FrameOutcome};
pub use handler::{HandlerError, NativeRequestHandler, RequestHandler};
pub use wire::{opcode, WireError, WireReader, WireResult, WireWriter};
