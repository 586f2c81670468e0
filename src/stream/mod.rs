//! Stream composition engine.
//!
//! Independently implemented byte sources and sinks ([`Resource`]s) are
//! wrapped in streams and wired together with budgeted links and filters.
//! Connected streams form a graph, which pulls data from producers into
//! consumers as capacity frees up.
//!
//! # Architecture
//!
//! ```text
//! [file source] ──link──► [upper filter] ─► [socket sink] ─► [gzip filter]
//!                                                                 │
//!                                                           data observers
//! ```
//!
//! # Design
//!
//! - **Arena with generation-checked ids**: streams, graphs and links live in
//!   one arena; stale ids are detected instead of dangling.
//! - **Reentrancy**: resources and observers may close streams, relink or
//!   write again mid-call. Scoped in-use guards defer frees, and an epoch on
//!   each graph aborts traversals whose topology changed underneath them.
//! - **No error type**: a resource that fails closes its stream; the engine
//!   guarantees queued work unwinds exactly once.
//! - **Direct transfer**: a producer with one unambiguous consumer hands its
//!   resource to the consumer's `put_from`, skipping the buffered read path.

mod arena;
mod close;
mod filter;
mod graph;
mod write;

pub mod buffer;
pub mod handle;
pub mod id;
pub mod queue;
pub mod resource;
pub mod snapshot;

pub use arena::{CloseCallback, DataCallback, FilterDirection, StreamState};
pub use filter::FilterOptions;
pub use handle::{Engine, Stream, StreamRef};
pub use id::{GraphId, LinkId, ObserverId, StreamId};
pub use resource::{Pipe, Resource, Retry};
pub use snapshot::{GraphSnapshot, LinkSnapshot, StreamSnapshot};
