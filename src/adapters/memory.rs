//! In-memory byte sink and source.
//!
//! Both keep their state behind shared handles so tests and benches can
//! inspect (or throttle) a resource after the engine has taken ownership
//! of it.

use crate::stream::{Resource, StreamRef};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Shared view of what a [`MemorySink`] has accepted.
#[derive(Debug, Clone, Default)]
pub struct SinkHandle {
    received: Rc<RefCell<Vec<u8>>>,
    blocked: Rc<Cell<bool>>,
    limit: Rc<Cell<Option<usize>>>,
    puts: Rc<Cell<usize>>,
    direct: Rc<Cell<usize>>,
}

impl SinkHandle {
    pub fn bytes(&self) -> Vec<u8> {
        self.received.borrow().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.received.borrow()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.received.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.borrow().is_empty()
    }

    /// While blocked the sink accepts nothing.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.set(blocked);
    }

    /// Cap the bytes accepted by each `put` (and each direct transfer).
    pub fn set_limit(&self, limit: Option<usize>) {
        self.limit.set(limit);
    }

    /// Number of `put` calls that reached the sink.
    pub fn put_calls(&self) -> usize {
        self.puts.get()
    }

    /// Bytes that arrived through direct transfer rather than `put`.
    pub fn direct_bytes(&self) -> usize {
        self.direct.get()
    }

    fn capacity(&self, wanted: usize) -> usize {
        if self.blocked.get() {
            return 0;
        }
        self.limit.get().map_or(wanted, |limit| wanted.min(limit))
    }
}

/// Sink that appends everything it accepts to a shared buffer.
#[derive(Debug, Default)]
pub struct MemorySink {
    shared: SinkHandle,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that accepts at most `limit` bytes per call.
    pub fn with_limit(limit: usize) -> Self {
        let sink = Self::default();
        sink.shared.set_limit(Some(limit));
        sink
    }

    pub fn handle(&self) -> SinkHandle {
        self.shared.clone()
    }
}

impl Resource for MemorySink {
    fn name(&self) -> &str {
        "memory-sink"
    }

    fn put(&mut self, _stream: &StreamRef, buf: &[u8]) -> usize {
        self.shared.puts.set(self.shared.puts.get() + 1);
        let accepted = self.shared.capacity(buf.len());
        self.shared
            .received
            .borrow_mut()
            .extend_from_slice(&buf[..accepted]);
        accepted
    }

    fn put_from(
        &mut self,
        _stream: &StreamRef,
        source: &mut dyn Resource,
        limit: Option<usize>,
    ) -> Option<usize> {
        let source = source.as_any_mut()?.downcast_mut::<MemorySource>()?;
        let wanted = limit.map_or(source.remaining(), |l| l.min(source.remaining()));
        let taken = source.take(self.shared.capacity(wanted));
        self.shared.received.borrow_mut().extend_from_slice(&taken);
        self.shared.direct.set(self.shared.direct.get() + taken.len());
        Some(taken.len())
    }
}

/// Source that produces a fixed byte string in chunks.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    offset: usize,
    chunk_size: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            chunk_size: usize::MAX,
        }
    }

    /// Deliver at most `chunk_size` bytes per `data` call.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, count: usize) -> Vec<u8> {
        let end = self.offset + count.min(self.remaining());
        let out = self.data[self.offset..end].to_vec();
        self.offset = end;
        out
    }
}

impl Resource for MemorySource {
    fn name(&self) -> &str {
        "memory-source"
    }

    /// Sources accept nothing.
    fn put(&mut self, _stream: &StreamRef, _buf: &[u8]) -> usize {
        0
    }

    fn bytes_left(&self) -> Option<usize> {
        Some(self.remaining())
    }

    fn read(&mut self, stream: &StreamRef, hint: Option<usize>) {
        let mut budget = hint.unwrap_or(usize::MAX);
        while budget > 0 && self.remaining() > 0 {
            let chunk = self.take(budget.min(self.chunk_size));
            budget -= chunk.len();
            stream.data(&chunk);
        }
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self as &mut dyn Any)
    }
}
