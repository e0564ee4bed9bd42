//! # EmberKV - A Versioned Key-Value Storage Node
//!
//! EmberKV is the socket front end of a distributed key-value storage node.
//! It speaks a compact binary protocol over TCP, tags every value with a
//! vector clock so replicas can reconcile concurrent writes, and serves all
//! of its connections from a single non-blocking selector thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                 │
//! │                                                                      │
//! │  ┌────────────┐    ┌──────────────┐    ┌─────────────────────────┐   │
//! │  │  Selector  │───>│  Connection  │───>│  NativeRequestHandler   │   │
//! │  │ (mio Poll) │    │ state machine│    │  GET/GET_ALL/PUT/DELETE │   │
//! │  └────────────┘    └──────────────┘    └────────────┬────────────┘   │
//! │                        │      ▲                     │                │
//! │                 framer │      │ responses           ▼                │
//! │                        ▼      │            ┌─────────────────┐       │
//! │                  ┌────────────┴───┐        │ StoreRepository │       │
//! │                  │  wire codec    │        │   MemoryStore   │       │
//! │                  └────────────────┘        └─────────────────┘       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request flows: socket bytes accumulate in the connection's input
//! buffer; the framer measures when exactly one request has arrived; the
//! handler parses it, drives the store, and serializes the response into
//! the output buffer; the connection flips its readiness interest to WRITE
//! and drains. Nothing on that path blocks the selector thread.
//!
//! ## Module Overview
//!
//! - [`buffer`]: fixed-capacity buffers with independent read/write cursors
//! - [`protocol`]: wire codec, request framer, and request handler
//! - [`versioning`]: vector clocks and causally-tagged values
//! - [`store`]: the store contract, error taxonomy, and in-memory engine
//! - [`server`]: the selector loop and per-connection state machine
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use emberkv::protocol::NativeRequestHandler;
//! use emberkv::server::Server;
//! use emberkv::store::{ErrorCodeMapper, MemoryStore, Store, StoreRepository};
//!
//! let repository = Arc::new(StoreRepository::new());
//! repository.add_local(Arc::new(MemoryStore::new("users")) as Arc<dyn Store>);
//!
//! let handler = Arc::new(NativeRequestHandler::new(repository, ErrorCodeMapper::new()));
//! Server::bind("127.0.0.1:6666".parse()?, handler)?.run()?;
//! ```
//!
//! ## Protocol Notes
//!
//! Store names travel as length-prefixed strings in the peer's modified
//! UTF-8. This implementation decodes strict UTF-8, which agrees with
//! modified UTF-8 on ASCII; non-ASCII store names are unsupported.

pub mod buffer;
pub mod protocol;
pub mod server;
pub mod store;
pub mod versioning;

// Re-export the types a server binary or test client needs.
pub use protocol::{NativeRequestHandler, RequestHandler};
pub use server::{Connection, Server};
pub use store::{ErrorCodeMapper, MemoryStore, Store, StoreError, StoreRepository};
pub use versioning::{VectorClock, Versioned};

/// The default port the node listens on.
pub const DEFAULT_PORT: u16 = 6666;

/// The default host the node binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of EmberKV.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
