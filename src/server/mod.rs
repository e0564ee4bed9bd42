//! Socket Server
//!
//! The non-blocking request pipeline: a single selector thread accepts
//! connections and drives every one of them through readiness events.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Selector Thread                          │
//! │                                                             │
//! │  ┌──────────┐   readiness   ┌──────────────────────────┐    │
//! │  │ mio Poll │ ────────────> │ Connection state machine │    │
//! │  └──────────┘               │  Reading <-> Writing     │    │
//! │       ▲                     └────────────┬─────────────┘    │
//! │       │ interest                         │ framed request   │
//! │       └──────────────────────────────────┤                  │
//! │                                          ▼                  │
//! │                                 ┌─────────────────┐         │
//! │                                 │ RequestHandler  │         │
//! │                                 └─────────────────┘         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`server`]: the poll loop - accept, register, dispatch, reconcile
//! - [`connection`]: one client's buffers, mode, and interest set

pub mod connection;
pub mod server;

pub use connection::{Connection, ConnectionError, Mode, CONNECTION_BUFFER_SIZE};
pub use server::Server;
