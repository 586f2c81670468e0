//! Graph expansion and traversal.
//!
//! A graph caches an *expanded* view of its topology in which every filter
//! is a stage of its own: a stream `S` with upstream filters `U0..Un` and
//! downstream filters `D0..Dm` expands to
//!
//! ```text
//! U0 -> U1 -> .. -> Un -> S -> D0 -> .. -> Dm
//! ```
//!
//! where `U0` is the most recently attached upstream filter. Links leave from
//! the last stage of their source and enter the first stage of their target.
//! The view is tagged with the graph epoch; any topology change clears it and
//! bumps the epoch, which aborts traversals that are still in flight.

use crate::config::TraversalMode;
use crate::stream::arena::{Arena, Core, ExpEdge, GraphInUse, InUse};
use crate::stream::close::release;
use crate::stream::handle::StreamRef;
use crate::stream::id::{GraphId, LinkId, StreamId};
use crate::stream::resource::Resource;
use crate::stream::snapshot::GraphSnapshot;
use crate::stream::write::{write, write_queued, WriteFlags};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, trace, warn};

// ==================== Expanded view ====================

/// Drop the cached expanded view and bump the epoch.
pub(crate) fn clear_expanded(arena: &mut Arena, graph: GraphId) {
    let epoch = arena.next_epoch();
    let Some(state) = arena.graphs.get_mut(graph) else {
        return;
    };
    state.epoch = epoch;
    state.expanded = false;
    state.roots_expanded.clear();
    let members = std::mem::take(&mut state.members_expanded);
    for id in members {
        reset_stage(arena, id);
    }
}

fn reset_stage(arena: &mut Arena, id: StreamId) {
    let Some(node) = arena.node_mut(id) else {
        return;
    };
    node.stage_span = (id, id);
    node.head_upstream = None;
    node.prev_direct = None;
    node.prev_expanded.clear();
    node.next_expanded.clear();
    let observers = std::mem::take(&mut node.exp_observers);
    arena.defer_drop(observers);
}

fn add_edge(arena: &mut Arena, from: StreamId, to: StreamId, link: Option<LinkId>) {
    if let Some(node) = arena.node_mut(from) {
        node.next_expanded.push(ExpEdge { peer: to, link });
    }
    if let Some(node) = arena.node_mut(to) {
        node.prev_expanded.push(ExpEdge { peer: from, link });
    }
}

fn visited(arena: &Arena, id: StreamId, epoch: u64) -> bool {
    arena.node(id).is_some_and(|n| n.last_expand == epoch)
}

/// Rebuild the expanded view from the root set.
pub(crate) fn expand(arena: &mut Arena, graph: GraphId) {
    clear_expanded(arena, graph);
    let Some(state) = arena.graphs.get(graph) else {
        return;
    };
    if state.retired {
        return;
    }
    let epoch = state.epoch;
    let roots = state.roots.clone();

    let mut members = Vec::new();
    let mut pending = Vec::new();
    let mut roots_expanded = Vec::new();

    for root in roots {
        if arena.node(root).is_none() || visited(arena, root, epoch) {
            continue;
        }
        let (first, _) = expand_stages(arena, root, epoch, &mut members, &mut pending);
        roots_expanded.push(first);

        // Follow links out of everything staged so far.
        while let Some(id) = pending.pop() {
            let Some(node) = arena.node(id) else {
                continue;
            };
            let last = node.stage_span.1;
            let targets: Vec<(LinkId, StreamId)> = node
                .next
                .iter()
                .filter_map(|l| arena.links.get(*l).map(|link| (*l, link.to)))
                .collect();

            for (link, to) in targets {
                if arena.node(to).is_none() {
                    continue;
                }
                let first = if visited(arena, to, epoch) {
                    arena.node(to).map_or(to, |n| n.stage_span.0)
                } else {
                    expand_stages(arena, to, epoch, &mut members, &mut pending).0
                };
                add_edge(arena, last, first, Some(link));
            }
        }
    }

    // A root reachable from another expanded node is not an entry point.
    roots_expanded.retain(|id| arena.node(*id).is_some_and(|n| n.prev_expanded.is_empty()));

    if let Some(state) = arena.graphs.get_mut(graph) {
        state.roots_expanded = roots_expanded;
        state.members_expanded = members;
        state.expanded = true;
    }

    if arena.log_topology {
        if let Some(snapshot) = GraphSnapshot::capture(arena, graph) {
            match snapshot.to_json() {
                Ok(json) => debug!("stream: expanded {}: {}", graph, json),
                Err(e) => warn!("stream: failed to serialize {}: {}", graph, e),
            }
        }
    }
}

/// Stage one stream together with its filters. Returns the first and last
/// stage ids.
fn expand_stages(
    arena: &mut Arena,
    id: StreamId,
    epoch: u64,
    members: &mut Vec<StreamId>,
    pending: &mut Vec<StreamId>,
) -> (StreamId, StreamId) {
    reset_stage(arena, id);
    let Some(node) = arena.node_mut(id) else {
        return (id, id);
    };
    node.last_expand = epoch;
    members.push(id);
    pending.push(id);

    let upstream: Vec<StreamId> = node.filters_upstream.iter().map(|f| f.stream).collect();
    let downstream: Vec<StreamId> = node.filters_downstream.iter().map(|f| f.stream).collect();
    let observers = node.data_observers.clone();

    let stageable = |arena: &Arena, f: StreamId| {
        arena
            .node(f)
            .is_some_and(|n| n.state.is_live() && n.last_expand != epoch)
    };

    let mut first = id;
    let mut head = None;
    let mut prev_last: Option<StreamId> = None;
    for filter in upstream {
        if !stageable(arena, filter) {
            continue;
        }
        let (f_first, f_last) = expand_stages(arena, filter, epoch, members, pending);
        match prev_last {
            Some(p) => add_edge(arena, p, f_first, None),
            None => {
                first = f_first;
                head = Some(filter);
            }
        }
        prev_last = Some(f_last);
    }
    if let Some(p) = prev_last {
        add_edge(arena, p, id, None);
    }

    let mut last = id;
    for filter in downstream {
        if !stageable(arena, filter) {
            continue;
        }
        let (f_first, f_last) = expand_stages(arena, filter, epoch, members, pending);
        add_edge(arena, last, f_first, None);
        last = f_last;
    }

    if let Some(stage) = arena.node_mut(last) {
        stage.exp_observers.extend(observers);
    }
    if let Some(node) = arena.node_mut(id) {
        node.head_upstream = head;
        node.stage_span = (first, last);
    }
    (first, last)
}

pub(crate) fn ensure_expanded(arena: &mut Arena, graph: GraphId) {
    let stale = arena
        .graphs
        .get(graph)
        .is_some_and(|g| !g.expanded && !g.retired);
    if stale {
        expand(arena, graph);
    }
}

/// Move every stream of `other` into `keep`, then retire `other`.
pub(crate) fn swallow(arena: &mut Arena, keep: GraphId, other: GraphId) {
    if keep == other {
        return;
    }
    clear_expanded(arena, keep);
    clear_expanded(arena, other);

    let moved = arena
        .graphs
        .get_mut(other)
        .map(|g| std::mem::take(&mut g.roots))
        .unwrap_or_default();

    let mut work = moved.clone();
    while let Some(id) = work.pop() {
        let Some(node) = arena.node_mut(id) else {
            continue;
        };
        if node.graph != other {
            continue;
        }
        node.graph = keep;
        work.extend(node.filters().map(|f| f.stream));
        let links = node.next.clone();
        work.extend(links.iter().filter_map(|l| arena.links.get(*l).map(|link| link.to)));
    }

    for root in moved {
        arena.add_root(keep, root);
    }
    arena.retire_graph(other);
    debug!("stream: {} swallowed {}", keep, other);
}

/// Is `to` reachable from `from` through links?
pub(crate) fn reaches(arena: &Arena, from: StreamId, to: StreamId) -> bool {
    let mut seen = HashSet::new();
    let mut work = vec![from];
    while let Some(id) = work.pop() {
        if id == to {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(node) = arena.node(id) {
            work.extend(node.next.iter().filter_map(|l| arena.links.get(*l).map(|link| link.to)));
        }
    }
    false
}

// ==================== Resource lending ====================

/// Run `f` against a stream's resource with the arena released.
///
/// The resource is taken out of its slot for the duration of the call, so a
/// reentrant attempt to use it again sees `None` instead of aliasing it.
pub(crate) fn lend<R>(
    core: &Rc<Core>,
    id: StreamId,
    f: impl FnOnce(&mut dyn Resource, &StreamRef) -> R,
) -> Option<R> {
    let _guard = InUse::enter(core, id)?;
    let mut resource = core.with(|a| a.node_mut(id)?.resource.take())?;
    let stream = StreamRef::new(core, id);
    let result = f(resource.as_mut(), &stream);
    core.with(|a| restore(a, id, resource));
    Some(result)
}

fn restore(arena: &mut Arena, id: StreamId, resource: Box<dyn Resource>) {
    match arena.node_mut(id) {
        Some(node) if node.resource.is_none() => node.resource = Some(resource),
        _ => arena.defer_drop(resource),
    }
}

fn lend_read(core: &Rc<Core>, id: StreamId, hint: Option<usize>) {
    if lend(core, id, |resource, stream| resource.read(stream, hint)).is_none() {
        trace!("stream: {} not readable right now", id);
    }
}

// ==================== Direct transfer ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direct {
    Unsupported,
    Transferred(usize),
}

fn min_budget(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// The single non-transparent stream data from `id` would reach, skipping
/// transparent stages, with the tightest link budget on the way.
///
/// `None` if there are several candidates, or a transparent stage leads
/// nowhere.
pub(crate) fn find_next_direct(arena: &Arena, id: StreamId) -> Option<(StreamId, Option<usize>)> {
    let mut found: Option<StreamId> = None;
    let mut limit: Option<usize> = None;
    let mut seen = HashSet::new();
    let mut work = vec![id];

    while let Some(current) = work.pop() {
        if !seen.insert(current) {
            continue;
        }
        let node = arena.node(current)?;
        if current != id && node.next_expanded.is_empty() {
            return None;
        }
        for edge in &node.next_expanded {
            if let Some(link) = edge.link {
                limit = min_budget(limit, arena.links.get(link)?.bytes_left);
            }
            let target = arena.node(edge.peer)?;
            if !target.state.is_live() {
                return None;
            }
            if arena.transparent_now(edge.peer) {
                work.push(edge.peer);
                continue;
            }
            if found.is_some_and(|f| f != edge.peer) {
                return None;
            }
            // Leftovers from the current producer must go first, and an
            // open scope holds everything.
            if !target.front_queue.is_empty() || target.queueing {
                return None;
            }
            found = Some(edge.peer);
        }
    }
    found.map(|sink| (sink, limit))
}

/// Let `sink` pull straight from `source` through [`Resource::put_from`].
pub(crate) fn write_direct(
    core: &Rc<Core>,
    source: StreamId,
    sink: StreamId,
    limit: Option<usize>,
) -> Direct {
    let Some(_source_guard) = InUse::enter(core, source) else {
        return Direct::Unsupported;
    };
    let Some(_sink_guard) = InUse::enter(core, sink) else {
        return Direct::Unsupported;
    };

    let lent = core.with(|a| {
        let src = a.node_mut(source)?.resource.take()?;
        match a.node_mut(sink).and_then(|n| n.resource.take()) {
            Some(dst) => Some((src, dst)),
            None => {
                restore(a, source, src);
                None
            }
        }
    });
    let Some((mut src, mut dst)) = lent else {
        return Direct::Unsupported;
    };

    let stream = StreamRef::new(core, sink);
    let result = dst.put_from(&stream, src.as_mut(), limit);
    core.with(|a| {
        restore(a, source, src);
        restore(a, sink, dst);
    });

    match result {
        None => Direct::Unsupported,
        Some(n) => {
            let n = limit.map_or(n, |l| n.min(l));
            trace!("stream: direct {} -> {} moved {} bytes", source, sink, n);
            if n > 0 {
                push(core, source, None, n);
            }
            Direct::Transferred(n)
        }
    }
}

/// Re-attempt the direct transfer bound into `sink`, if it still applies.
pub(crate) fn retry_direct(core: &Rc<Core>, sink: StreamId) -> Option<Direct> {
    let (source, limit) = core.with(|a| {
        let source = a.node(sink)?.prev_direct?;
        match find_next_direct(a, source) {
            Some((found, limit)) if found == sink => Some((source, limit)),
            _ => None,
        }
    })?;
    let result = write_direct(core, source, sink, limit);
    settle_links(core, source);
    Some(result)
}

// ==================== Traversal ====================

struct Walk {
    graph: GraphId,
    serial: u64,
    epoch: u64,
}

impl Walk {
    /// False once a nested read started, the topology changed, or the graph
    /// was swallowed.
    fn current(&self, core: &Core) -> bool {
        core.with(|a| {
            a.graphs.get(self.graph).is_some_and(|g| {
                !g.retired && g.read_serial == self.serial && g.epoch == self.epoch
            })
        })
    }
}

/// Pull data from every producer in the graph into its successors.
pub(crate) fn read(core: &Rc<Core>, graph: GraphId) {
    let Some(_guard) = GraphInUse::enter(core, graph) else {
        return;
    };
    let started = core.with(|a| {
        ensure_expanded(a, graph);
        let state = a.graphs.get_mut(graph)?;
        state.read_serial += 1;
        let walk = Walk {
            graph,
            serial: state.read_serial,
            epoch: state.epoch,
        };
        Some((walk, state.roots_expanded.clone()))
    });
    let Some((walk, roots)) = started else {
        return;
    };
    trace!("stream: read {} from {} roots", graph, roots.len());

    let mut seen = HashSet::new();
    match core.config.traversal {
        TraversalMode::Recursive => {
            for root in roots {
                read_recursive(core, &walk, &mut seen, root, None);
                if !walk.current(core) {
                    break;
                }
            }
        }
        TraversalMode::Worklist => read_worklist(core, &walk, &mut seen, roots),
    }
}

fn read_recursive(
    core: &Rc<Core>,
    walk: &Walk,
    seen: &mut HashSet<StreamId>,
    id: StreamId,
    budget: Option<usize>,
) {
    if !seen.insert(id) {
        return;
    }
    let descend = read_node(core, id, budget);
    if !descend || !walk.current(core) {
        return;
    }
    for (next, budget) in successors(core, id) {
        read_recursive(core, walk, seen, next, budget);
        if !walk.current(core) {
            return;
        }
    }
}

fn read_worklist(
    core: &Rc<Core>,
    walk: &Walk,
    seen: &mut HashSet<StreamId>,
    roots: Vec<StreamId>,
) {
    let mut work: Vec<(StreamId, Option<usize>)> =
        roots.into_iter().rev().map(|r| (r, None)).collect();
    while let Some((id, budget)) = work.pop() {
        if !seen.insert(id) {
            continue;
        }
        let descend = read_node(core, id, budget);
        if !walk.current(core) {
            return;
        }
        if descend {
            work.extend(successors(core, id).into_iter().rev());
        }
    }
}

fn successors(core: &Core, id: StreamId) -> Vec<(StreamId, Option<usize>)> {
    core.with(|a| {
        let Some(node) = a.node(id) else {
            return Vec::new();
        };
        node.next_expanded
            .iter()
            .map(|e| {
                let budget = e.link.and_then(|l| a.links.get(l)).and_then(|l| l.bytes_left);
                (e.peer, budget)
            })
            .collect()
    })
}

enum ReadPlan {
    Skip,
    Direct {
        sink: StreamId,
        limit: Option<usize>,
        hint: Option<usize>,
    },
    Read {
        hint: Option<usize>,
    },
}

/// Pull from one stream. Returns whether the walk should continue into its
/// successors.
fn read_node(core: &Rc<Core>, id: StreamId, budget: Option<usize>) -> bool {
    let plan = core.with(|a| {
        let node = a.node(id)?;
        if !node.state.is_live() {
            return None;
        }
        // Links force a read, filters alone don't.
        let observed = !node.exp_observers.is_empty() || !node.data_observers.is_empty();
        if node.next.is_empty() && !observed {
            return Some(ReadPlan::Skip);
        }

        let hint = budget.or_else(|| largest_budget(a, id));
        if !observed {
            if let Some((sink, limit)) = find_next_direct(a, id) {
                if let Some(sink_node) = a.node_mut(sink) {
                    sink_node.prev_direct = Some(id);
                }
                return Some(ReadPlan::Direct {
                    sink,
                    limit: min_budget(limit, hint),
                    hint,
                });
            }
        }
        Some(ReadPlan::Read { hint })
    });

    match plan {
        None => false,
        Some(ReadPlan::Skip) => true,
        Some(ReadPlan::Direct { sink, limit, hint }) => {
            match write_direct(core, id, sink, limit) {
                Direct::Transferred(_) => {
                    settle_links(core, id);
                    false
                }
                Direct::Unsupported => {
                    lend_read(core, id, hint);
                    settle_links(core, id);
                    true
                }
            }
        }
        Some(ReadPlan::Read { hint }) => {
            lend_read(core, id, hint);
            settle_links(core, id);
            true
        }
    }
}

/// Largest budget among a stream's outgoing links, `None` if any is
/// unbounded or there are none.
fn largest_budget(arena: &Arena, id: StreamId) -> Option<usize> {
    let node = arena.node(id)?;
    let mut largest: Option<usize> = None;
    for link in &node.next {
        let left = arena.links.get(*link)?.bytes_left?;
        largest = Some(largest.map_or(left, |l| l.max(left)));
    }
    largest
}

// ==================== Push and link exhaustion ====================

/// Deliver `size` bytes produced by `id` to its expanded successors.
///
/// `buf` is `None` after a direct transfer, when the bytes already reached
/// the sink and only link budgets need accounting.
pub(crate) fn push(core: &Rc<Core>, id: StreamId, buf: Option<&[u8]>, size: usize) {
    let Some(_guard) = InUse::enter(core, id) else {
        return;
    };
    let mut delivered: Vec<ExpEdge> = Vec::new();
    let mut epoch: Option<u64> = None;
    let mut index = 0;

    loop {
        let step = core.with(|a| {
            let graph = a.graph_of(id)?;
            ensure_expanded(a, graph);
            let current = a.graphs.get(graph)?.epoch;
            if epoch != Some(current) {
                // Topology changed under us, start over but skip edges that
                // were already served.
                epoch = Some(current);
                index = 0;
            }
            let node = a.node(id)?;
            loop {
                let edge = *node.next_expanded.get(index)?;
                index += 1;
                if delivered.contains(&edge) || !a.is_live(edge.peer) {
                    continue;
                }
                let budget = match edge.link {
                    Some(link) => match a.links.get(link) {
                        Some(l) => l.bytes_left,
                        None => continue,
                    },
                    None => None,
                };
                return Some((edge, budget, a.transparent_now(edge.peer)));
            }
        });
        let Some((edge, budget, transparent)) = step else {
            break;
        };
        delivered.push(edge);

        let to_write = budget.map_or(size, |b| b.min(size));
        if to_write > 0 {
            let chunk = buf.map(|b| &b[..to_write.min(b.len())]);
            if transparent {
                push(core, edge.peer, chunk, to_write);
            } else if let Some(chunk) = chunk {
                write(core, edge.peer, chunk, WriteFlags::PRODUCER);
            }
        }
        if let Some(link) = edge.link {
            consume_budget(core, link, to_write);
        }
    }
}

fn consume_budget(core: &Rc<Core>, link: LinkId, count: usize) {
    let exhausted = core.with(|a| {
        let link = a.links.get_mut(link)?;
        let left = link.bytes_left.as_mut()?;
        *left = left.saturating_sub(count);
        Some(*left == 0)
    });
    if exhausted == Some(true) {
        expire_link(core, link);
    }
}

/// End unbounded links out of `id` once its resource reports exhaustion.
pub(crate) fn settle_links(core: &Rc<Core>, id: StreamId) {
    let unbounded: Vec<LinkId> = core.with(|a| {
        let Some(node) = a.node(id) else {
            return Vec::new();
        };
        node.next
            .iter()
            .copied()
            .filter(|l| a.links.get(*l).is_some_and(|link| link.bytes_left.is_none()))
            .collect()
    });
    if unbounded.is_empty() {
        return;
    }
    let left = lend(core, id, |resource, _| resource.bytes_left()).flatten();
    if left == Some(0) {
        for link in unbounded {
            expire_link(core, link);
        }
    }
}

/// A link finished: delete its source if asked to, otherwise detach it and
/// promote the destination to a root.
pub(crate) fn expire_link(core: &Rc<Core>, link: LinkId) {
    let Some(info) = core.with(|a| a.links.get(link).cloned()) else {
        return;
    };
    debug!(
        "stream: link {} ({} -> {}) exhausted{}",
        link,
        info.from,
        info.to,
        if info.delete_source { ", deleting source" } else { "" }
    );
    if info.delete_source {
        release(core, info.from);
        return;
    }

    let graph = core.with(|a| {
        a.remove_link(link);
        let node = a.node(info.to)?;
        let graph = node.graph;
        if node.filter_of.is_none() {
            a.add_root(graph, info.to);
        }
        expand(a, graph);
        Some(graph)
    });
    resume_detached(core, info.to);
    if let Some(graph) = graph {
        read(core, graph);
    }
}

/// A producer stopped feeding `id`: replay what queued up meanwhile, in its
/// head filter stage first.
pub(crate) fn resume_detached(core: &Rc<Core>, id: StreamId) {
    let stage = core.with(|a| {
        let graph = a.graph_of(id)?;
        ensure_expanded(a, graph);
        a.node(id).map(|n| n.stage_span.0)
    });
    if let Some(stage) = stage.filter(|s| *s != id) {
        write_queued(core, stage);
    }
    write_queued(core, id);
}

// ==================== Data delivery ====================

/// Entry point for bytes produced by a stream's resource: run observers,
/// then push to successors.
pub(crate) fn data(core: &Rc<Core>, id: StreamId, buf: &[u8]) {
    if buf.is_empty() {
        return;
    }
    let Some(_guard) = InUse::enter(core, id) else {
        return;
    };
    let observers = core.with(|a| {
        let graph = a.graph_of(id)?;
        ensure_expanded(a, graph);
        let node = a.node(id)?;
        node.state.is_live().then(|| node.exp_observers.clone())
    });
    let Some(observers) = observers else {
        return;
    };

    for observer in observers {
        let (live, registered) = core.with(|a| {
            let registered = a.node(observer.owner).is_some_and(|n| {
                n.state.is_live() && n.data_observers.iter().any(|o| o.id == observer.id)
            });
            (a.is_live(id), registered)
        });
        if !live {
            return;
        }
        if !registered {
            continue;
        }
        let owner = StreamRef::new(core, observer.owner);
        match observer.callback.try_borrow_mut() {
            Ok(mut callback) => (&mut *callback)(&owner, buf),
            Err(_) => warn!("stream: skipped reentrant data observer on {}", observer.owner),
        }
    }

    push(core, id, Some(buf), buf.len());
}
