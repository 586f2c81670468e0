//! Public handles.
//!
//! - [`Engine`] owns all stream state.
//! - [`Stream`] owns one stream; dropping it deletes the stream.
//! - [`StreamRef`] is a cheap, cloneable, non-owning handle. Resources and
//!   observers receive one, and a `Stream` derefs to it.
//!
//! Handles outlive what they point to gracefully: once the stream (or the
//! whole engine) is gone every operation is a no-op, writes consume nothing
//! and queries return `None`.

use crate::config::EngineConfig;
use crate::stream::arena::{
    CloseCallback, CloseObserver, Core, DataCallback, DataObserver, FilterDirection, StreamState,
};
use crate::stream::close::{close, release};
use crate::stream::filter::{add_filter, remove_filter, FilterOptions};
use crate::stream::graph::{data, expand, lend, read};
use crate::stream::id::{GraphId, ObserverId, StreamId};
use crate::stream::resource::{Pipe, Resource, Retry};
use crate::stream::snapshot::GraphSnapshot;
use crate::stream::write::{
    begin_queue, clear_queue, end_queue, end_queue_with, queued_bytes, retry, write, write_stream,
    WriteFlags,
};
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

// ==================== Engine ====================

/// Owner of every stream, graph and link.
///
/// Single-threaded: streams, resources and observers all live on the thread
/// that created the engine.
pub struct Engine {
    core: Rc<Core>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        tracing::debug!("stream: engine created ({:?})", config);
        Self {
            core: Rc::new(Core::new(config)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// New stream backed by `resource`, as the sole root of a new graph.
    pub fn stream<R: Resource + 'static>(&self, resource: R) -> Stream {
        self.stream_boxed(Box::new(resource))
    }

    pub fn stream_boxed(&self, resource: Box<dyn Resource>) -> Stream {
        let id = self.core.with(|a| a.create_node(resource));
        trace!("stream: created {}", id);
        Stream {
            inner: StreamRef::new(&self.core, id),
            owned: true,
        }
    }

    /// New transparent pass-through stream.
    pub fn pipe(&self) -> Stream {
        self.stream(Pipe)
    }

    /// Streams currently allocated, including closed ones not yet deleted.
    pub fn stream_count(&self) -> usize {
        self.core.with(|a| a.nodes.len())
    }

    pub fn graph_count(&self) -> usize {
        self.core.with(|a| a.graphs.len())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("streams", &self.stream_count())
            .field("graphs", &self.graph_count())
            .finish()
    }
}

// ==================== StreamRef ====================

/// Non-owning handle to a stream.
#[derive(Clone)]
pub struct StreamRef {
    core: Weak<Core>,
    id: StreamId,
}

impl StreamRef {
    pub(crate) fn new(core: &Rc<Core>, id: StreamId) -> Self {
        Self {
            core: Rc::downgrade(core),
            id,
        }
    }

    /// A handle bound to no engine. Every operation on it is a no-op; useful
    /// for driving a [`Resource`] by hand.
    pub fn detached() -> Self {
        Self {
            core: Weak::new(),
            id: StreamId::new(u32::MAX, 0),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    fn with_core<R>(&self, default: R, f: impl FnOnce(&Rc<Core>) -> R) -> R {
        match self.core.upgrade() {
            Some(core) => f(&core),
            None => {
                trace!("stream: {} used after its engine was dropped", self.id);
                default
            }
        }
    }

    fn same_engine(&self, other: &StreamRef) -> bool {
        let same = Weak::ptr_eq(&self.core, &other.core);
        if !same {
            warn!("stream: {} and {} belong to different engines", self.id, other.id);
        }
        same
    }

    /// The stream still exists and has not been deleted.
    pub fn is_alive(&self) -> bool {
        self.with_core(false, |core| {
            core.with(|a| a.node(self.id).is_some_and(|n| n.handle_alive))
        })
    }

    pub fn state(&self) -> Option<StreamState> {
        self.with_core(None, |core| core.with(|a| a.node(self.id).map(|n| n.state)))
    }

    pub fn graph_id(&self) -> Option<GraphId> {
        self.with_core(None, |core| core.with(|a| a.graph_of(self.id)))
    }

    pub fn name(&self) -> Option<String> {
        self.with_core(None, |core| core.with(|a| a.node(self.id).map(|n| n.name.clone())))
    }

    /// Write all of `buf`; whatever the resource can't take now is queued.
    /// Returns the bytes consumed (zero once the stream is closed).
    pub fn write(&self, buf: &[u8]) -> usize {
        self.with_core(0, |core| write(core, self.id, buf, WriteFlags::NONE))
    }

    /// Write what the stream accepts right now and return that count.
    /// Nothing is queued.
    pub fn write_partial(&self, buf: &[u8]) -> usize {
        self.with_core(0, |core| write(core, self.id, buf, WriteFlags::PARTIAL))
    }

    /// Relay `count` bytes (`None` = until exhausted) from `source` into this
    /// stream, deleting `source` afterwards if `delete_source` is set.
    pub fn write_from(&self, source: &StreamRef, count: Option<usize>, delete_source: bool) {
        if !self.same_engine(source) {
            return;
        }
        self.with_core((), |core| {
            write_stream(core, self.id, source.id, count, false, delete_source)
        })
    }

    /// Transform bytes written into this stream through `filter`. The most
    /// recently added upstream filter sees the bytes first.
    pub fn add_filter_upstream(&self, filter: &StreamRef, options: FilterOptions) -> bool {
        self.same_engine(filter)
            && self.with_core(false, |core| {
                add_filter(core, self.id, filter.id, FilterDirection::Upstream, options)
            })
    }

    /// Transform bytes this stream produces through `filter`. Downstream
    /// filters apply in the order they were added.
    pub fn add_filter_downstream(&self, filter: &StreamRef, options: FilterOptions) -> bool {
        self.same_engine(filter)
            && self.with_core(false, |core| {
                add_filter(core, self.id, filter.id, FilterDirection::Downstream, options)
            })
    }

    pub fn remove_filter(&self, filter: &StreamRef) -> bool {
        self.same_engine(filter)
            && self.with_core(false, |core| remove_filter(core, self.id, filter.id))
    }

    pub fn begin_queue(&self) {
        self.with_core((), |core| begin_queue(core, self.id))
    }

    pub fn end_queue(&self) {
        self.with_core((), |core| end_queue(core, self.id))
    }

    /// End the queueing scope, writing `heads` ahead of the held-back data.
    pub fn end_queue_with(&self, heads: &[&[u8]]) {
        self.with_core((), |core| end_queue_with(core, self.id, heads))
    }

    /// Bytes waiting in this stream's queues, `None` if unknown.
    pub fn queued_bytes(&self) -> Option<usize> {
        self.with_core(None, |core| queued_bytes(core, self.id))
    }

    pub fn clear_queue(&self) {
        self.with_core((), |core| clear_queue(core, self.id))
    }

    /// Close the stream. Without `immediate`, the close waits for the queues
    /// to drain and any producer to finish, and this returns false.
    pub fn close(&self, immediate: bool) -> bool {
        self.with_core(true, |core| close(core, self.id, immediate))
    }

    pub fn retry(&self, when: Retry) {
        self.with_core((), |core| retry(core, self.id, when))
    }

    /// Observe bytes this stream produces (after its downstream filters).
    pub fn on_data(&self, f: impl FnMut(&StreamRef, &[u8]) + 'static) -> Option<ObserverId> {
        let callback: Rc<RefCell<DataCallback>> = Rc::new(RefCell::new(f));
        self.with_core(None, |core| {
            core.with(|a| {
                let id = a.next_observer_id();
                let node = a.node_mut(self.id)?;
                node.data_observers.push(DataObserver {
                    id,
                    owner: self.id,
                    callback,
                });
                let graph = node.graph;
                expand(a, graph);
                Some(id)
            })
        })
    }

    pub fn remove_data_observer(&self, observer: ObserverId) -> bool {
        self.with_core(false, |core| {
            core.with(|a| {
                let Some(node) = a.node_mut(self.id) else {
                    return false;
                };
                let Some(index) = node.data_observers.iter().position(|o| o.id == observer) else {
                    return false;
                };
                let removed = node.data_observers.remove(index);
                let graph = node.graph;
                a.defer_drop(removed);
                expand(a, graph);
                true
            })
        })
    }

    /// Called once when the stream finishes closing, in registration order.
    pub fn on_close(&self, f: impl FnMut(&StreamRef) + 'static) -> Option<ObserverId> {
        let callback: Rc<RefCell<CloseCallback>> = Rc::new(RefCell::new(f));
        self.with_core(None, |core| {
            core.with(|a| {
                let id = a.next_observer_id();
                let node = a.node_mut(self.id)?;
                node.close_observers.push(CloseObserver { id, callback });
                Some(id)
            })
        })
    }

    pub fn remove_close_observer(&self, observer: ObserverId) -> bool {
        self.with_core(false, |core| {
            core.with(|a| {
                let Some(node) = a.node_mut(self.id) else {
                    return false;
                };
                let Some(index) = node.close_observers.iter().position(|o| o.id == observer)
                else {
                    return false;
                };
                let removed = node.close_observers.remove(index);
                a.defer_drop(removed);
                true
            })
        })
    }

    /// Deliver bytes produced by this stream's resource.
    pub fn data(&self, buf: &[u8]) {
        self.with_core((), |core| data(core, self.id, buf))
    }

    /// Ask the graph to pull from its producers.
    pub fn pull(&self) {
        self.with_core((), |core| {
            if let Some(graph) = core.with(|a| a.graph_of(self.id)) {
                read(core, graph);
            }
        })
    }

    /// What the backing resource reports it can still produce.
    pub fn bytes_left(&self) -> Option<usize> {
        self.with_core(None, |core| {
            lend(core, self.id, |resource, _| resource.bytes_left()).flatten()
        })
    }

    /// Serializable picture of the graph this stream belongs to.
    pub fn snapshot(&self) -> Option<GraphSnapshot> {
        self.with_core(None, |core| {
            core.with(|a| {
                let graph = a.graph_of(self.id)?;
                GraphSnapshot::capture(a, graph)
            })
        })
    }

    /// Delete the stream now. Any owning [`Stream`] handle goes stale.
    pub fn delete(&self) {
        self.with_core((), |core| release(core, self.id))
    }
}

impl PartialEq for StreamRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for StreamRef {}

impl fmt::Debug for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamRef({:?})", self.id)
    }
}

impl io::Write for StreamRef {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(StreamRef::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ==================== Stream ====================

/// Owning handle to a stream. Dropping it deletes the stream.
pub struct Stream {
    inner: StreamRef,
    owned: bool,
}

impl Stream {
    /// Give up ownership. The stream lives on until [`StreamRef::delete`],
    /// or until a transfer that was told to delete it completes.
    pub fn into_ref(mut self) -> StreamRef {
        self.owned = false;
        self.inner.clone()
    }

    pub fn as_stream_ref(&self) -> &StreamRef {
        &self.inner
    }
}

impl Deref for Stream {
    type Target = StreamRef;

    fn deref(&self) -> &StreamRef {
        &self.inner
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.owned {
            self.inner.delete();
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stream({:?})", self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_detached_handle_is_inert() {
        let stream = StreamRef::detached();
        assert_eq!(stream.write(b"abc"), 0);
        assert!(!stream.is_alive());
        assert_eq!(stream.queued_bytes(), None);
        assert!(stream.close(false));
    }

    #[test]
    fn test_drop_deletes_stream() {
        let engine = Engine::new();
        let stream = engine.pipe();
        let weak = stream.as_stream_ref().clone();
        assert_eq!(engine.stream_count(), 1);

        drop(stream);
        assert_eq!(engine.stream_count(), 0);
        assert_eq!(engine.graph_count(), 0);
        assert!(!weak.is_alive());
        assert_eq!(weak.write(b"x"), 0);
    }

    #[test]
    fn test_into_ref_keeps_stream() {
        let engine = Engine::new();
        let stream = engine.pipe().into_ref();
        assert!(stream.is_alive());
        assert_eq!(engine.stream_count(), 1);

        stream.delete();
        assert_eq!(engine.stream_count(), 0);
    }

    #[test]
    fn test_engine_dropped_first() {
        let engine = Engine::new();
        let stream = engine.pipe();
        drop(engine);
        assert!(!stream.is_alive());
        assert_eq!(stream.write(b"late"), 0);
    }

    #[test]
    fn test_io_write_formats() {
        let engine = Engine::new();
        let stream = engine.pipe();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        stream.on_data(move |_, buf| sink.borrow_mut().extend_from_slice(buf));

        let mut out = stream.as_stream_ref().clone();
        write!(out, "{}-{}", 4, 2).expect("write");
        assert_eq!(seen.borrow().as_slice(), b"4-2");
    }

    #[test]
    fn test_handles_compare_by_stream() {
        let engine = Engine::new();
        let a = engine.pipe();
        let b = engine.pipe();
        assert_eq!(*a, a.as_stream_ref().clone());
        assert_ne!(*a, *b);
    }
}
