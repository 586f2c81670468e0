//! Capability contract between the engine and a concrete backing resource.
//!
//! The engine never performs I/O itself. A resource accepts bytes through
//! [`Resource::put`], produces bytes by calling [`StreamRef::data`] from
//! within (or after) [`Resource::read`], and reports exhaustion through
//! [`Resource::bytes_left`]. Failures are not errors here: a resource that
//! can no longer make progress simply closes its stream.

use crate::stream::handle::StreamRef;
use std::any::Any;

/// A byte sink and/or source backing one stream.
pub trait Resource {
    /// Short name used in logs and graph snapshots.
    fn name(&self) -> &str {
        "resource"
    }

    /// A transparent resource has no backing of its own; the engine forwards
    /// bytes written to it straight to its successors.
    fn is_transparent(&self) -> bool {
        false
    }

    /// Accept as many bytes as possible right now. Returning less than
    /// `buf.len()` (including zero) is not an error.
    fn put(&mut self, stream: &StreamRef, buf: &[u8]) -> usize;

    /// Pull up to `limit` bytes straight out of `source`, skipping the
    /// buffered read path. Return `None` if this pairing is not supported,
    /// or `Some(n)` with the number of bytes transferred.
    fn put_from(
        &mut self,
        _stream: &StreamRef,
        _source: &mut dyn Resource,
        _limit: Option<usize>,
    ) -> Option<usize> {
        None
    }

    /// Bytes this resource can still produce, if known. `Some(0)` means
    /// exhausted.
    fn bytes_left(&self) -> Option<usize> {
        None
    }

    /// Start producing up to roughly `hint` bytes. Output is delivered via
    /// [`StreamRef::data`], now or later.
    fn read(&mut self, _stream: &StreamRef, _hint: Option<usize>) {}

    /// Downcast hook so `put_from` implementations can recognise a source
    /// type they know how to drain.
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
}

/// Transparent pass-through resource.
///
/// While the stream has no data observers and no queueing scope the engine
/// bypasses `put` entirely. Otherwise bytes are handed to `put`, which
/// re-delivers them so observers run.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pipe;

impl Resource for Pipe {
    fn name(&self) -> &str {
        "pipe"
    }

    fn is_transparent(&self) -> bool {
        true
    }

    fn put(&mut self, stream: &StreamRef, buf: &[u8]) -> usize {
        stream.data(buf);
        buf.len()
    }
}

/// When to re-attempt a stalled transfer into a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Re-run any bound direct transfer, then drain the queues.
    Now,
    /// Drain the queues as soon as more data is queued.
    OnMoreData,
    /// Cancel a pending `OnMoreData`.
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_is_transparent() {
        assert!(Pipe.is_transparent());
        assert_eq!(Pipe.name(), "pipe");
        assert_eq!(Pipe.bytes_left(), None);
    }

    #[test]
    fn test_default_put_from_is_unsupported() {
        let mut sink = Pipe;
        let mut source = Pipe;
        let stream = StreamRef::detached();
        assert_eq!(sink.put_from(&stream, &mut source, Some(4)), None);
    }
}
