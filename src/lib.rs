//! # netloom: composable byte streams
//!
//! Independently implemented byte sources and sinks are wrapped in streams
//! and wired together with budgeted links, upstream/downstream filters and
//! queues. A stream's owner writes into it; the engine routes, buffers and
//! pulls data through the graph as capacity frees up.
//!
//! ## Architecture
//!
//! - **stream**: the single-threaded composition engine (arena, graphs,
//!   write ladder, close state machine, filters, handles)
//! - **adapters**: in-memory and channel-backed resources plus transform filters
//! - **config**: TOML settings for the engine, logging and the relay binary
//! - **logging**: tracing subscriber setup
//!
//! ## Example
//!
//! ```
//! use netloom::adapters::{MemorySink, Transform};
//! use netloom::stream::{Engine, FilterOptions};
//!
//! let engine = Engine::new();
//! let sink = MemorySink::new();
//! let received = sink.handle();
//! let out = engine.stream(sink);
//! let upper = engine.stream(Transform::preset("upper").unwrap());
//! out.add_filter_upstream(&upper, FilterOptions::default());
//!
//! out.write(b"hello");
//! assert_eq!(received.text(), "HELLO");
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod logging;
pub mod stream;

// Re-export commonly used types
pub use config::{EngineConfig, NetloomConfig, TraversalMode};
pub use error::{NetloomError, Result};
pub use stream::{Engine, FilterOptions, Resource, Retry, Stream, StreamRef};
