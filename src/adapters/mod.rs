//! Ready-made resources for in-process use.
//!
//! - [`MemorySink`] / [`MemorySource`] - byte buffers, used heavily by tests
//! - [`Transform`] - byte-mapping filter with named presets
//! - [`ChannelSink`] - hands bytes to another thread

pub mod channel;
pub mod memory;
pub mod transform;

pub use channel::ChannelSink;
pub use memory::{MemorySink, MemorySource, SinkHandle};
pub use transform::{Transform, PRESETS};
