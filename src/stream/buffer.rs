//! Growable byte buffer for queued stream data.
//!
//! Bytes are appended at the tail and consumed from the head as a resource
//! accepts them. Consumption is an O(1) cursor move on the underlying
//! `BytesMut`; the allocation is reclaimed once the buffer is drained.

use bytes::{Buf, BytesMut};

/// Initial allocation for a fresh queue buffer.
pub const INITIAL_CAPACITY: usize = 4 * 1024;

/// Pending bytes not yet accepted by a resource.
#[derive(Debug, Default, Clone)]
pub struct QueueBuffer {
    data: BytesMut,
}

impl QueueBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::new();
        buffer.extend(bytes);
        buffer
    }

    /// Append bytes at the tail.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.data.capacity() == 0 {
            self.data.reserve(bytes.len().max(INITIAL_CAPACITY));
        }
        self.data.extend_from_slice(bytes);
    }

    /// Bytes still waiting to be consumed.
    #[inline]
    pub fn remaining(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mark `count` bytes at the head as consumed. Clamped to `len()`.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.advance(count);
        if self.data.is_empty() {
            self.data = BytesMut::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_and_consume() {
        let mut buffer = QueueBuffer::from_slice(b"hello ");
        buffer.extend(b"world");
        assert_eq!(buffer.remaining(), b"hello world");

        buffer.consume(6);
        assert_eq!(buffer.remaining(), b"world");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_consume_is_clamped() {
        let mut buffer = QueueBuffer::from_slice(b"abc");
        buffer.consume(10);
        assert!(buffer.is_empty());

        // Still usable after being drained
        buffer.extend(b"xyz");
        assert_eq!(buffer.remaining(), b"xyz");
    }
}
