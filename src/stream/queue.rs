//! Per-stream pending-write queues.
//!
//! Every stream owns two queues:
//!
//! - **front**: bytes from the current producer that the resource could not
//!   accept yet. They pre-empt everything else.
//! - **back**: writes that arrived while the stream was busy or inside a
//!   queueing scope. They are replayed, in order, once the stream is free.
//!
//! Entries are tagged: plain data, a stream redirect (a deferred
//! `write_from`), or a begin-queue marker that re-enters queueing when the
//! replay reaches it.

use crate::stream::buffer::QueueBuffer;
use crate::stream::id::StreamId;
use std::collections::VecDeque;

/// A deferred stream-to-stream write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    pub source: StreamId,
    /// `None` = until the source is exhausted.
    pub bytes_left: Option<usize>,
    /// Delete the source once the transfer completes, or when discarded.
    pub delete_source: bool,
}

#[derive(Debug)]
pub enum QueueEntry {
    Data { serial: u64, buffer: QueueBuffer },
    Redirect(Redirect),
    BeginQueue,
}

/// What was thrown away by [`StreamQueue::discard`].
#[derive(Debug, Default)]
pub struct Discarded {
    pub bytes: usize,
    pub redirects: Vec<Redirect>,
    pub had_marker: bool,
}

impl Discarded {
    /// Sources the caller must delete, each exactly once.
    pub fn doomed_sources(&self) -> Vec<StreamId> {
        self.redirects
            .iter()
            .filter(|r| r.delete_source)
            .map(|r| r.source)
            .collect()
    }

    pub fn merge(&mut self, other: Discarded) {
        self.bytes += other.bytes;
        self.redirects.extend(other.redirects);
        self.had_marker |= other.had_marker;
    }
}

#[derive(Debug, Default)]
pub struct StreamQueue {
    entries: VecDeque<QueueEntry>,
    next_serial: u64,
}

impl StreamQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    fn serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// Append at the tail, coalescing into the last entry when it is data.
    pub fn append_data(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(QueueEntry::Data { buffer, .. }) = self.entries.back_mut() {
            buffer.extend(bytes);
            return;
        }
        let serial = self.serial();
        self.entries.push_back(QueueEntry::Data {
            serial,
            buffer: QueueBuffer::from_slice(bytes),
        });
    }

    /// Insert ahead of everything already queued.
    pub fn prepend_data(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let serial = self.serial();
        self.entries.push_front(QueueEntry::Data {
            serial,
            buffer: QueueBuffer::from_slice(bytes),
        });
    }

    pub fn push_redirect(&mut self, redirect: Redirect) {
        self.entries.push_back(QueueEntry::Redirect(redirect));
    }

    pub fn push_marker(&mut self) {
        self.entries.push_back(QueueEntry::BeginQueue);
    }

    pub fn has_marker(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, QueueEntry::BeginQueue))
    }

    /// Drop the most recent begin-queue marker. Returns whether one existed.
    pub fn remove_last_marker(&mut self) -> bool {
        let position = self
            .entries
            .iter()
            .rposition(|e| matches!(e, QueueEntry::BeginQueue));
        match position {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Consume `count` bytes of the data entry tagged `serial`, wherever it
    /// now sits. The entry is removed once empty. Returns `false` if the entry
    /// no longer exists (it was cleared while its bytes were in flight).
    pub fn consume(&mut self, serial: u64, count: usize) -> bool {
        let position = self.entries.iter().position(
            |e| matches!(e, QueueEntry::Data { serial: s, .. } if *s == serial),
        );
        let Some(index) = position else {
            return false;
        };
        let drained = match &mut self.entries[index] {
            QueueEntry::Data { buffer, .. } => {
                buffer.consume(count);
                buffer.is_empty()
            }
            _ => false,
        };
        if drained {
            self.entries.remove(index);
        }
        true
    }

    /// Plain data bytes pending in this queue.
    pub fn data_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match e {
                QueueEntry::Data { buffer, .. } => buffer.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn redirects(&self) -> impl Iterator<Item = &Redirect> {
        self.entries.iter().filter_map(|e| match e {
            QueueEntry::Redirect(r) => Some(r),
            _ => None,
        })
    }

    /// Empty the queue, reporting what was thrown away.
    pub fn discard(&mut self) -> Discarded {
        let mut discarded = Discarded::default();
        for entry in self.entries.drain(..) {
            match entry {
                QueueEntry::Data { buffer, .. } => discarded.bytes += buffer.len(),
                QueueEntry::Redirect(r) => discarded.redirects.push(r),
                QueueEntry::BeginQueue => discarded.had_marker = true,
            }
        }
        discarded
    }
}
