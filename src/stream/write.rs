//! Write path: the dispatch ladder, stream-to-stream writes, queueing scopes
//! and queue replay.
//!
//! Every write walks the same ladder, first match wins:
//!
//! 1. upstream filters present → hand the bytes to the head filter
//! 2. a producer occupies the stream → back queue
//! 3. the current producer has leftovers, or a scope is open → front queue
//! 4. queueing scope open, or anything still queued → back queue
//! 5. transparent → push straight to successors
//! 6. otherwise `put`, queueing whatever was not accepted
//!
//! Internal writes skip rungs through [`WriteFlags`].

use crate::stream::arena::{Core, InUse, Link, NodeState};
use crate::stream::close::{release, retry_deferred_close};
use crate::stream::graph::{
    ensure_expanded, expand, lend, push, reaches, read, retry_direct, swallow,
};
use crate::stream::id::{GraphId, StreamId};
use crate::stream::queue::{QueueEntry, Redirect, StreamQueue};
use crate::stream::resource::Retry;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Which rungs of the dispatch ladder a write skips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WriteFlags {
    pub bypass_filters: bool,
    pub bypass_busy: bool,
    pub bypass_queue: bool,
    /// Return the accepted count instead of queueing the remainder.
    pub partial: bool,
}

impl WriteFlags {
    /// Plain user write.
    pub const NONE: Self = Self {
        bypass_filters: false,
        bypass_busy: false,
        bypass_queue: false,
        partial: false,
    };

    pub const PARTIAL: Self = Self {
        partial: true,
        ..Self::NONE
    };

    /// Bytes pushed by the producer occupying the stream. They were already
    /// filtered upstream.
    pub const PRODUCER: Self = Self {
        bypass_filters: true,
        bypass_busy: true,
        ..Self::NONE
    };

    /// Replay of a queued entry.
    pub const DRAIN: Self = Self {
        bypass_filters: true,
        bypass_busy: true,
        bypass_queue: true,
        partial: true,
    };

    /// Head buffers written ahead of a closing queueing scope.
    pub const HEAD: Self = Self {
        bypass_queue: true,
        bypass_busy: true,
        ..Self::NONE
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Refuse,
    Forward(StreamId),
    Back,
    Front,
    Push,
    Put,
}

fn route(node: &NodeState, transparent: bool, flags: WriteFlags) -> Route {
    if !node.state.is_live() {
        return Route::Refuse;
    }
    if !flags.bypass_filters {
        if let Some(head) = node.head_upstream {
            return Route::Forward(head);
        }
    }
    let queue_or_refuse = |queue| if flags.partial { Route::Refuse } else { queue };

    let busy = node.is_busy();
    if busy && !flags.bypass_busy {
        return queue_or_refuse(Route::Back);
    }
    // Producer bytes held by a scope wait in the front queue, in order.
    if busy && !flags.bypass_queue && (node.queueing || !node.front_queue.is_empty()) {
        return queue_or_refuse(Route::Front);
    }
    // Leftovers of a producer that already detached still go first.
    let pending = !node.back_queue.is_empty() || !node.front_queue.is_empty();
    if !busy && !flags.bypass_queue && (node.queueing || pending) {
        return queue_or_refuse(Route::Back);
    }
    if transparent {
        Route::Push
    } else {
        Route::Put
    }
}

/// Write `buf` into stream `id`. Returns the bytes consumed: for partial
/// writes what the resource accepted, otherwise everything (the remainder
/// is queued) or zero if the stream is gone.
pub(crate) fn write(core: &Rc<Core>, id: StreamId, buf: &[u8], flags: WriteFlags) -> usize {
    if buf.is_empty() {
        return 0;
    }
    let decision = core.with(|a| {
        let Some(graph) = a.graph_of(id) else {
            return Route::Refuse;
        };
        ensure_expanded(a, graph);
        let transparent = a.transparent_now(id);
        a.node(id)
            .map_or(Route::Refuse, |node| route(node, transparent, flags))
    });
    trace!("stream: write {} bytes to {} via {:?}", buf.len(), id, decision);

    match decision {
        Route::Refuse => 0,
        Route::Forward(head) => {
            write(core, head, buf, WriteFlags::NONE);
            buf.len()
        }
        Route::Back | Route::Front => {
            enqueue(core, id, buf, decision == Route::Front);
            buf.len()
        }
        Route::Push => {
            push(core, id, Some(buf), buf.len());
            buf.len()
        }
        Route::Put => put(core, id, buf, flags),
    }
}

fn enqueue(core: &Rc<Core>, id: StreamId, buf: &[u8], front: bool) {
    let retry = core.with(|a| {
        let node = a.node_mut(id)?;
        if front {
            node.front_queue.append_data(buf);
        } else {
            node.back_queue.append_data(buf);
        }
        Some(std::mem::take(&mut node.retry_on_more_data))
    });
    if retry == Some(true) {
        write_queued(core, id);
    }
}

fn put(core: &Rc<Core>, id: StreamId, buf: &[u8], flags: WriteFlags) -> usize {
    let written = lend(core, id, |resource, stream| resource.put(stream, buf))
        .unwrap_or(0)
        .min(buf.len());
    if flags.partial {
        return written;
    }
    if written < buf.len() {
        let rest = &buf[written..];
        core.with(|a| {
            let busy = a.is_busy(id);
            let Some(node) = a.node_mut(id) else {
                return;
            };
            if !node.state.is_live() {
                return;
            }
            // Whatever else is pending has to wait behind the remainder.
            if busy {
                node.front_queue.append_data(rest);
            } else {
                node.back_queue.prepend_data(rest);
            }
        });
    }
    buf.len()
}

/// Transfer `count` bytes (`None` = until exhausted) from `source` into
/// `dest` through a link.
pub(crate) fn write_stream(
    core: &Rc<Core>,
    dest: StreamId,
    source: StreamId,
    count: Option<usize>,
    bypass_queue: bool,
    delete_source: bool,
) {
    if source == dest {
        warn!("stream: refusing to link {} to itself", source);
        return;
    }

    enum Plan {
        Ignore,
        DeleteSource,
        Queued { retry: bool },
        Linked(GraphId),
    }

    let plan = core.with(|a| {
        if !a.is_live(source) {
            return Plan::Ignore;
        }
        if !a.is_live(dest) || count == Some(0) {
            return if delete_source {
                Plan::DeleteSource
            } else {
                Plan::Ignore
            };
        }
        let (Some(source_graph), Some(dest_graph)) = (a.graph_of(source), a.graph_of(dest)) else {
            return Plan::Ignore;
        };
        if let Some(node) = a.node_mut(dest) {
            // One producer at a time; later ones wait their turn in order.
            if !bypass_queue
                && (node.queueing || !node.back_queue.is_empty() || !node.prev.is_empty())
            {
                node.back_queue.push_redirect(Redirect {
                    source,
                    bytes_left: count,
                    delete_source,
                });
                return Plan::Queued {
                    retry: std::mem::take(&mut node.retry_on_more_data),
                };
            }
        }

        if source_graph != dest_graph {
            swallow(a, source_graph, dest_graph);
        }
        let link = a.links.insert(Link {
            from: source,
            to: dest,
            bytes_left: count,
            delete_source,
        });
        if let Some(node) = a.node_mut(source) {
            node.next.push(link);
        }
        if let Some(node) = a.node_mut(dest) {
            node.prev.push(link);
        }
        // A cycle keeps its entry point.
        if !reaches(a, dest, source) {
            a.remove_root(source_graph, dest);
        }
        expand(a, source_graph);
        Plan::Linked(source_graph)
    });

    match plan {
        Plan::Ignore => {}
        Plan::DeleteSource => release(core, source),
        Plan::Queued { retry } => {
            trace!("stream: queued redirect {} -> {}", source, dest);
            if retry {
                write_queued(core, dest);
            }
        }
        Plan::Linked(graph) => {
            debug!("stream: linked {} -> {} ({:?} bytes)", source, dest, count);
            read(core, graph);
        }
    }
}

// ==================== Queue replay ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Front,
    Back,
}

impl Side {
    fn of(self, node: &mut NodeState) -> &mut StreamQueue {
        match self {
            Side::Front => &mut node.front_queue,
            Side::Back => &mut node.back_queue,
        }
    }
}

enum Head {
    Empty,
    Halt,
    Data(u64, Vec<u8>),
    Redirect(Redirect),
}

/// Replay pending writes: the front queue first, then, once nothing
/// occupies the stream, the back queue.
pub(crate) fn write_queued(core: &Rc<Core>, id: StreamId) {
    let Some(_guard) = InUse::enter(core, id) else {
        return;
    };
    let queueing = core.with(|a| a.node(id).map(|n| n.queueing));
    if queueing == Some(false) && drain(core, id, Side::Front) && !core.with(|a| a.is_busy(id)) {
        drain(core, id, Side::Back);
    }
    retry_deferred_close(core, id);
}

/// Returns true once the queue is empty.
fn drain(core: &Rc<Core>, id: StreamId, side: Side) -> bool {
    loop {
        let head = core.with(|a| {
            let Some(node) = a.node_mut(id) else {
                return Head::Halt;
            };
            if !node.state.is_live() || node.queueing {
                return Head::Halt;
            }
            let queue = side.of(node);
            let data = match queue.front() {
                None => return Head::Empty,
                Some(QueueEntry::Data { serial, buffer }) => {
                    Some((*serial, buffer.remaining().to_vec()))
                }
                Some(_) => None,
            };
            if let Some((serial, bytes)) = data {
                return Head::Data(serial, bytes);
            }
            match queue.pop_front() {
                Some(QueueEntry::Redirect(redirect)) => Head::Redirect(redirect),
                _ => {
                    // Marker: everything behind it belongs to a later scope.
                    node.queueing = true;
                    Head::Halt
                }
            }
        });

        match head {
            Head::Empty => return true,
            Head::Halt => return false,
            Head::Data(serial, bytes) => {
                let written = write(core, id, &bytes, WriteFlags::DRAIN);
                core.with(|a| {
                    if let Some(node) = a.node_mut(id) {
                        side.of(node).consume(serial, written);
                    }
                });
                if written < bytes.len() {
                    return false;
                }
            }
            Head::Redirect(redirect) => {
                write_stream(
                    core,
                    id,
                    redirect.source,
                    redirect.bytes_left,
                    true,
                    redirect.delete_source,
                );
                // The replayed producer now occupies the stream.
                if side == Side::Back && core.with(|a| a.is_busy(id)) {
                    return false;
                }
            }
        }
    }
}

// ==================== Queueing scopes ====================

/// Hold back writes until [`end_queue`].
pub(crate) fn begin_queue(core: &Rc<Core>, id: StreamId) {
    core.with(|a| {
        let Some(node) = a.node_mut(id) else {
            return;
        };
        if node.queueing || node.back_queue.has_marker() {
            return;
        }
        if node.back_queue.is_empty() {
            node.queueing = true;
        } else {
            // Older entries still go out; queueing starts behind them.
            node.back_queue.push_marker();
        }
    });
}

pub(crate) fn end_queue(core: &Rc<Core>, id: StreamId) {
    let ended = core.with(|a| {
        let node = a.node_mut(id)?;
        if node.queueing {
            node.queueing = false;
            Some(true)
        } else {
            Some(node.back_queue.remove_last_marker())
        }
    });
    if ended == Some(false) {
        debug!("stream: end_queue on {} without an open scope", id);
    }
    write_queued(core, id);
}

/// End the scope, writing `heads` ahead of everything it held back.
pub(crate) fn end_queue_with(core: &Rc<Core>, id: StreamId, heads: &[&[u8]]) {
    // One write, so a partial accept can't let a later head overtake an
    // earlier one.
    let head = heads.concat();
    if !head.is_empty() {
        write(core, id, &head, WriteFlags::HEAD);
    }
    end_queue(core, id);
}

/// Bytes pending in the queues, `None` if some queued source can't tell.
pub(crate) fn queued_bytes(core: &Rc<Core>, id: StreamId) -> Option<usize> {
    let (mut total, redirects) = core.with(|a| {
        let node = a.node(id)?;
        let data = node.front_queue.data_bytes() + node.back_queue.data_bytes();
        let redirects: Vec<Redirect> = node.back_queue.redirects().copied().collect();
        Some((data, redirects))
    })?;
    for redirect in redirects {
        total += match redirect.bytes_left {
            Some(n) => n,
            None => lend(core, redirect.source, |resource, _| resource.bytes_left()).flatten()?,
        };
    }
    Some(total)
}

/// Drop everything in the back queue. Redirect sources flagged for deletion
/// are deleted, once each.
pub(crate) fn clear_queue(core: &Rc<Core>, id: StreamId) {
    let doomed = core.with(|a| {
        let node = a.node_mut(id)?;
        let discarded = node.back_queue.discard();
        // A discarded marker would have reopened the scope.
        if discarded.had_marker {
            node.queueing = true;
        }
        debug!(
            "stream: cleared queue of {} ({} bytes, {} redirects)",
            id,
            discarded.bytes,
            discarded.redirects.len()
        );
        Some(discarded.doomed_sources())
    });
    for source in doomed.unwrap_or_default() {
        release(core, source);
    }
    retry_deferred_close(core, id);
}

pub(crate) fn retry(core: &Rc<Core>, id: StreamId, when: Retry) {
    match when {
        Retry::Now => {
            retry_direct(core, id);
            write_queued(core, id);
            // Caught up with the current producer: pull more from it.
            let graph = core.with(|a| {
                let node = a.node(id)?;
                (node.is_busy() && node.front_queue.is_empty()).then_some(node.graph)
            });
            if let Some(graph) = graph {
                read(core, graph);
            }
        }
        Retry::OnMoreData | Retry::Never => core.with(|a| {
            if let Some(node) = a.node_mut(id) {
                node.retry_on_more_data = when == Retry::OnMoreData;
            }
        }),
    }
}
