//! Node, graph and link storage.
//!
//! All engine state lives in one [`Arena`] behind a `RefCell` in [`Core`].
//! The arena is only ever borrowed for short bookkeeping sections and never
//! while user code (resources, observers) runs. User objects that must be
//! dropped while the arena is borrowed are pushed to a deferred-drop list and
//! released by [`Core::with`] once the borrow ends.
//!
//! Deallocation goes through the scoped [`InUse`] / [`GraphInUse`] guards:
//! a node is freed when its handle is gone and its use count drops to zero,
//! a graph when it has been retired and nothing is traversing it.

use crate::config::EngineConfig;
use crate::stream::handle::StreamRef;
use crate::stream::id::{GraphId, LinkId, ObserverId, StreamId};
use crate::stream::queue::StreamQueue;
use crate::stream::resource::Resource;
use serde::Serialize;
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

// ==================== Generational slots ====================

pub(crate) trait ArenaKey: Copy {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn parts(self) -> (u32, u32);
}

macro_rules! impl_arena_key {
    ($($name:ident),*) => {
        $(impl ArenaKey for $name {
            #[inline]
            fn from_parts(index: u32, generation: u32) -> Self {
                $name::new(index, generation)
            }

            #[inline]
            fn parts(self) -> (u32, u32) {
                (self.index() as u32, self.generation())
            }
        })*
    };
}

impl_arena_key!(StreamId, GraphId, LinkId);

struct SlotEntry<T> {
    generation: u32,
    value: Option<T>,
}

/// Vec-backed storage addressed by generation-checked keys.
pub(crate) struct Slots<K, T> {
    entries: Vec<SlotEntry<T>>,
    free: Vec<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Slots<K, T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> K {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            return K::from_parts(index, entry.generation);
        }
        let index = self.entries.len() as u32;
        self.entries.push(SlotEntry {
            generation: 0,
            value: Some(value),
        });
        K::from_parts(index, 0)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let (index, generation) = key.parts();
        self.entries
            .get(index as usize)
            .filter(|e| e.generation == generation)
            .and_then(|e| e.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let (index, generation) = key.parts();
        self.entries
            .get_mut(index as usize)
            .filter(|e| e.generation == generation)
            .and_then(|e| e.value.as_mut())
    }

    /// Remove the value and bump the slot generation so `key` goes stale.
    pub fn remove(&mut self, key: K) -> Option<T> {
        let (index, generation) = key.parts();
        let entry = self.entries.get_mut(index as usize)?;
        if entry.generation != generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, e)| {
            e.value
                .as_ref()
                .map(|v| (K::from_parts(index as u32, e.generation), v))
        })
    }
}

// ==================== Node state ====================

pub type DataCallback = dyn FnMut(&StreamRef, &[u8]);
pub type CloseCallback = dyn FnMut(&StreamRef);

/// A registered data observer. `owner` is the stream it was registered on,
/// which is the handle passed to the callback even when a filter stage
/// delivers the bytes.
#[derive(Clone)]
pub(crate) struct DataObserver {
    pub id: ObserverId,
    pub owner: StreamId,
    pub callback: Rc<RefCell<DataCallback>>,
}

#[derive(Clone)]
pub(crate) struct CloseObserver {
    pub id: ObserverId,
    pub callback: Rc<RefCell<CloseCallback>>,
}

/// Which side of a stream a filter is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDirection {
    /// Transforms bytes written into the stream.
    Upstream,
    /// Transforms bytes the stream produces.
    Downstream,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FilterSlot {
    pub stream: StreamId,
    pub delete_with_stream: bool,
    pub close_together: bool,
}

/// One edge of the expanded view. `link` is `None` for filter edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExpEdge {
    pub peer: StreamId,
    pub link: Option<LinkId>,
}

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Open,
    /// Close requested while blocked; completes once the queues drain and
    /// no producer remains.
    CloseRequested,
    Closing,
    Closed,
}

impl StreamState {
    /// Still accepting writes and taking part in transfers.
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, StreamState::Open | StreamState::CloseRequested)
    }
}

pub(crate) struct NodeState {
    pub resource: Option<Box<dyn Resource>>,
    pub name: String,
    pub transparent: bool,
    pub graph: GraphId,
    pub state: StreamState,

    pub data_observers: Vec<DataObserver>,
    pub close_observers: Vec<CloseObserver>,

    /// Index 0 is the most recently attached, which sees written bytes first.
    pub filters_upstream: Vec<FilterSlot>,
    /// In attachment order; the last one is applied last.
    pub filters_downstream: Vec<FilterSlot>,
    pub filter_of: Option<(StreamId, FilterDirection)>,

    pub front_queue: StreamQueue,
    pub back_queue: StreamQueue,
    pub queueing: bool,
    pub retry_on_more_data: bool,

    pub prev: Vec<LinkId>,
    pub next: Vec<LinkId>,

    // Expanded view, valid while `last_expand` equals the graph epoch.
    pub last_expand: u64,
    pub stage_span: (StreamId, StreamId),
    pub head_upstream: Option<StreamId>,
    pub prev_expanded: Vec<ExpEdge>,
    pub next_expanded: Vec<ExpEdge>,
    pub exp_observers: Vec<DataObserver>,
    /// Producer currently bound for direct transfer into this node.
    pub prev_direct: Option<StreamId>,

    pub use_count: u32,
    pub handle_alive: bool,
}

impl NodeState {
    fn new(id: StreamId, resource: Box<dyn Resource>, graph: GraphId) -> Self {
        Self {
            name: resource.name().to_string(),
            transparent: resource.is_transparent(),
            resource: Some(resource),
            graph,
            state: StreamState::Open,
            data_observers: Vec::new(),
            close_observers: Vec::new(),
            filters_upstream: Vec::new(),
            filters_downstream: Vec::new(),
            filter_of: None,
            front_queue: StreamQueue::new(),
            back_queue: StreamQueue::new(),
            queueing: false,
            retry_on_more_data: false,
            prev: Vec::new(),
            next: Vec::new(),
            last_expand: 0,
            stage_span: (id, id),
            head_upstream: None,
            prev_expanded: Vec::new(),
            next_expanded: Vec::new(),
            exp_observers: Vec::new(),
            prev_direct: None,
            use_count: 0,
            handle_alive: true,
        }
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterSlot> {
        self.filters_upstream
            .iter()
            .chain(self.filters_downstream.iter())
    }

    /// A producer link currently feeds this node. Filter edges don't count.
    pub fn is_busy(&self) -> bool {
        self.prev_expanded.iter().any(|e| e.link.is_some())
    }

    /// Blocks a non-immediate close.
    pub fn close_blocked(&self) -> bool {
        !self.prev.is_empty() || !self.front_queue.is_empty() || !self.back_queue.is_empty()
    }
}

// ==================== Graph and link state ====================

pub(crate) struct GraphState {
    pub roots: Vec<StreamId>,
    pub roots_expanded: Vec<StreamId>,
    /// Every node visited by the last expansion.
    pub members_expanded: Vec<StreamId>,
    pub epoch: u64,
    pub expanded: bool,
    pub read_serial: u64,
    pub use_count: u32,
    pub retired: bool,
}

impl GraphState {
    fn new(epoch: u64) -> Self {
        Self {
            roots: Vec::new(),
            roots_expanded: Vec::new(),
            members_expanded: Vec::new(),
            epoch,
            expanded: false,
            read_serial: 0,
            use_count: 0,
            retired: false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub from: StreamId,
    pub to: StreamId,
    /// `None` = unbounded, ends when the source reports exhaustion.
    pub bytes_left: Option<usize>,
    pub delete_source: bool,
}

// ==================== Arena ====================

pub(crate) struct Arena {
    pub nodes: Slots<StreamId, NodeState>,
    pub graphs: Slots<GraphId, GraphState>,
    pub links: Slots<LinkId, Link>,
    epoch_counter: u64,
    observer_counter: u64,
    deferred_drops: Vec<Box<dyn Any>>,
    /// Dump each expansion at debug level.
    pub log_topology: bool,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            nodes: Slots::new(),
            graphs: Slots::new(),
            links: Slots::new(),
            epoch_counter: 0,
            observer_counter: 0,
            deferred_drops: Vec::new(),
            log_topology: false,
        }
    }

    /// Engine-wide monotonic epoch, so epochs never repeat across graphs.
    pub fn next_epoch(&mut self) -> u64 {
        self.epoch_counter += 1;
        self.epoch_counter
    }

    pub fn next_observer_id(&mut self) -> ObserverId {
        self.observer_counter += 1;
        ObserverId(self.observer_counter)
    }

    /// Keep `value` alive until the current borrow ends.
    pub fn defer_drop<T: 'static>(&mut self, value: T) {
        self.deferred_drops.push(Box::new(value));
    }

    /// New node as the singleton root of a new graph.
    pub fn create_node(&mut self, resource: Box<dyn Resource>) -> StreamId {
        let epoch = self.next_epoch();
        let graph = self.graphs.insert(GraphState::new(epoch));
        let id = self.nodes.insert_with(|id| NodeState::new(id, resource, graph));
        if let Some(state) = self.graphs.get_mut(graph) {
            state.roots.push(id);
        }
        id
    }

    #[inline]
    pub fn node(&self, id: StreamId) -> Option<&NodeState> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn node_mut(&mut self, id: StreamId) -> Option<&mut NodeState> {
        self.nodes.get_mut(id)
    }

    pub fn is_live(&self, id: StreamId) -> bool {
        self.node(id).is_some_and(|n| n.state.is_live())
    }

    pub fn graph_of(&self, id: StreamId) -> Option<GraphId> {
        self.node(id).map(|n| n.graph)
    }

    pub fn is_busy(&self, id: StreamId) -> bool {
        self.node(id).is_some_and(NodeState::is_busy)
    }

    /// Bytes written to a transparent node skip `put` while nothing observes
    /// it and no queueing scope is open.
    pub fn transparent_now(&self, id: StreamId) -> bool {
        self.node(id).is_some_and(|n| {
            n.transparent
                && n.data_observers.is_empty()
                && n.exp_observers.is_empty()
                && !n.queueing
        })
    }

    pub fn add_root(&mut self, graph: GraphId, id: StreamId) {
        if let Some(state) = self.graphs.get_mut(graph) {
            if !state.roots.contains(&id) {
                state.roots.push(id);
            }
        }
    }

    pub fn remove_root(&mut self, graph: GraphId, id: StreamId) {
        if let Some(state) = self.graphs.get_mut(graph) {
            state.roots.retain(|r| *r != id);
        }
    }

    /// Unregister a link from both endpoints and free it.
    pub fn remove_link(&mut self, link: LinkId) -> Option<Link> {
        let removed = self.links.remove(link)?;
        if let Some(from) = self.node_mut(removed.from) {
            from.next.retain(|l| *l != link);
        }
        if let Some(to) = self.node_mut(removed.to) {
            to.prev.retain(|l| *l != link);
        }
        Some(removed)
    }

    /// Mark a graph for deletion. It is freed now if nothing is traversing
    /// it, otherwise when the last [`GraphInUse`] guard drops.
    pub fn retire_graph(&mut self, graph: GraphId) {
        let epoch = self.next_epoch();
        let Some(state) = self.graphs.get_mut(graph) else {
            return;
        };
        state.retired = true;
        state.expanded = false;
        state.epoch = epoch;
        state.read_serial += 1;
        state.roots.clear();
        state.roots_expanded.clear();
        state.members_expanded.clear();
        if state.use_count == 0 {
            self.graphs.remove(graph);
        }
    }

    /// Free the node if its handle is gone and nothing is using it.
    pub fn free_if_unused(&mut self, id: StreamId) {
        let unused = self
            .node(id)
            .is_some_and(|n| !n.handle_alive && n.use_count == 0);
        if unused {
            if let Some(state) = self.nodes.remove(id) {
                tracing::trace!("stream: freed {} ({})", id, state.name);
                self.defer_drop(state);
            }
        }
    }
}

impl<T> Slots<StreamId, T> {
    /// Insert a value that needs to know its own key.
    fn insert_with(&mut self, make: impl FnOnce(StreamId) -> T) -> StreamId {
        let (index, generation) = match self.free.last() {
            Some(&index) => (index, self.entries[index as usize].generation),
            None => (self.entries.len() as u32, 0),
        };
        let key = StreamId::new(index, generation);
        let value = make(key);
        let inserted = self.insert(value);
        debug_assert_eq!(inserted, key);
        inserted
    }
}

// ==================== Core and guards ====================

/// Shared engine state. Handles hold it weakly; guards hold it strongly.
pub(crate) struct Core {
    pub arena: RefCell<Arena>,
    pub config: EngineConfig,
}

impl Core {
    pub fn new(config: EngineConfig) -> Self {
        let mut arena = Arena::new();
        arena.log_topology = config.log_topology;
        Self {
            arena: RefCell::new(arena),
            config,
        }
    }

    /// Run a bookkeeping section against the arena. Anything deferred for
    /// dropping during the section is dropped after the borrow is released,
    /// so destructors may safely re-enter the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut Arena) -> R) -> R {
        let (result, garbage) = {
            let mut arena = self.arena.borrow_mut();
            let result = f(&mut arena);
            (result, std::mem::take(&mut arena.deferred_drops))
        };
        drop(garbage);
        result
    }
}

/// Keeps a node allocated while user code runs on its behalf.
pub(crate) struct InUse {
    core: Rc<Core>,
    id: StreamId,
}

impl InUse {
    pub fn enter(core: &Rc<Core>, id: StreamId) -> Option<Self> {
        core.with(|arena| {
            let node = arena.node_mut(id)?;
            node.use_count += 1;
            Some(Self {
                core: Rc::clone(core),
                id,
            })
        })
    }
}

impl Drop for InUse {
    fn drop(&mut self) {
        let id = self.id;
        self.core.with(|arena| {
            if let Some(node) = arena.node_mut(id) {
                node.use_count = node.use_count.saturating_sub(1);
            }
            arena.free_if_unused(id);
        });
    }
}

/// Keeps a graph allocated while it is being traversed.
pub(crate) struct GraphInUse {
    core: Rc<Core>,
    id: GraphId,
}

impl GraphInUse {
    pub fn enter(core: &Rc<Core>, id: GraphId) -> Option<Self> {
        core.with(|arena| {
            let graph = arena.graphs.get_mut(id)?;
            if graph.retired {
                return None;
            }
            graph.use_count += 1;
            Some(Self {
                core: Rc::clone(core),
                id,
            })
        })
    }
}

impl Drop for GraphInUse {
    fn drop(&mut self) {
        let id = self.id;
        self.core.with(|arena| {
            let Some(graph) = arena.graphs.get_mut(id) else {
                return;
            };
            graph.use_count = graph.use_count.saturating_sub(1);
            if graph.use_count == 0 && graph.retired {
                arena.graphs.remove(id);
                tracing::trace!("stream: freed retired {}", id);
            }
        });
    }
}
