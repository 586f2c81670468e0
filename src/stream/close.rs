//! Close state machine and stream deletion.
//!
//! `Open -> CloseRequested -> Closing -> Closed`. A non-immediate close is
//! deferred while a producer link feeds the stream or anything is queued,
//! and is re-attempted whenever a queue drains. Deleting a stream (dropping
//! its owning handle) closes it immediately, unhooks it from filters and the
//! root set, and frees it once no call in progress still uses it.

use crate::stream::arena::{Core, InUse, StreamState};
use crate::stream::graph::{clear_expanded, expand, read, resume_detached};
use crate::stream::handle::StreamRef;
use crate::stream::id::{GraphId, StreamId};
use std::rc::Rc;
use tracing::{debug, trace, warn};

enum Decision {
    AlreadyClosed,
    Deferred,
    Proceed,
}

/// Close `id`. Returns false if the close was deferred.
pub(crate) fn close(core: &Rc<Core>, id: StreamId, immediate: bool) -> bool {
    let decision = core.with(|a| {
        let node = a.node_mut(id)?;
        Some(match node.state {
            StreamState::Closing | StreamState::Closed => Decision::AlreadyClosed,
            _ if !immediate && node.close_blocked() => {
                node.state = StreamState::CloseRequested;
                Decision::Deferred
            }
            _ => Decision::Proceed,
        })
    });
    match decision {
        None | Some(Decision::AlreadyClosed) => true,
        Some(Decision::Deferred) => {
            debug!("stream: close of {} deferred until drained", id);
            false
        }
        Some(Decision::Proceed) => {
            finish_close(core, id);
            true
        }
    }
}

/// Complete a deferred close once nothing blocks it any more.
pub(crate) fn retry_deferred_close(core: &Rc<Core>, id: StreamId) {
    let ready = core.with(|a| {
        a.node(id)
            .is_some_and(|n| n.state == StreamState::CloseRequested && !n.close_blocked())
    });
    if ready {
        finish_close(core, id);
    }
}

struct Teardown {
    successors: Vec<StreamId>,
    doomed: Vec<StreamId>,
    close_together: Vec<StreamId>,
    observers: Vec<crate::stream::arena::CloseObserver>,
}

fn finish_close(core: &Rc<Core>, id: StreamId) {
    let Some(_guard) = InUse::enter(core, id) else {
        return;
    };
    let teardown = core.with(|a| {
        let graph = a.graph_of(id)?;
        let node = a.node_mut(id)?;
        node.state = StreamState::Closing;
        let incoming = std::mem::take(&mut node.prev);
        let outgoing = std::mem::take(&mut node.next);
        let is_filter = node.filter_of.is_some();

        let mut discarded = node.front_queue.discard();
        discarded.merge(node.back_queue.discard());
        node.queueing = false;
        node.retry_on_more_data = false;

        let close_together: Vec<StreamId> = node
            .filters()
            .filter(|f| f.close_together)
            .map(|f| f.stream)
            .collect();
        let observers = node.close_observers.clone();

        clear_expanded(a, graph);
        for link in incoming {
            a.remove_link(link);
        }
        let mut successors = Vec::new();
        for link in outgoing {
            let Some(removed) = a.remove_link(link) else {
                continue;
            };
            let promote = a.node(removed.to).is_some_and(|n| n.filter_of.is_none());
            if promote {
                a.add_root(graph, removed.to);
            }
            successors.push(removed.to);
        }
        if !is_filter {
            a.add_root(graph, id);
        }
        expand(a, graph);

        Some(Teardown {
            successors,
            doomed: discarded.doomed_sources(),
            close_together,
            observers,
        })
    });
    let Some(teardown) = teardown else {
        return;
    };
    debug!(
        "stream: closing {} ({} successors, {} queued sources)",
        id,
        teardown.successors.len(),
        teardown.doomed.len()
    );

    for successor in teardown.successors {
        resume_detached(core, successor);
    }
    for source in teardown.doomed {
        release(core, source);
    }
    for filter in teardown.close_together {
        close(core, filter, true);
    }

    let stream = StreamRef::new(core, id);
    for observer in teardown.observers {
        let registered = core.with(|a| {
            a.node(id)
                .is_some_and(|n| n.close_observers.iter().any(|o| o.id == observer.id))
        });
        if !registered {
            continue;
        }
        match observer.callback.try_borrow_mut() {
            Ok(mut callback) => (&mut *callback)(&stream),
            Err(_) => warn!("stream: skipped reentrant close observer on {}", id),
        }
    }

    let graph: Option<GraphId> = core.with(|a| {
        let node = a.node_mut(id)?;
        node.state = StreamState::Closed;
        Some(node.graph)
    });
    if let Some(graph) = graph {
        read(core, graph);
    }
}

/// Delete a stream: its owning handle is gone, or the graph asked for it.
pub(crate) fn release(core: &Rc<Core>, id: StreamId) {
    let live = core.with(|a| a.node(id).map(|n| (n.handle_alive, n.state.is_live())));
    let Some((true, live)) = live else {
        return;
    };
    if live {
        close(core, id, true);
    }

    let owned = core.with(|a| {
        let node = a.node_mut(id)?;
        if !node.handle_alive {
            return None;
        }
        node.handle_alive = false;
        let graph = node.graph;
        let host = node.filter_of.take();
        let mut filters: Vec<_> = node.filters_upstream.drain(..).collect();
        filters.extend(node.filters_downstream.drain(..));
        let data_observers = std::mem::take(&mut node.data_observers);
        let close_observers = std::mem::take(&mut node.close_observers);
        a.defer_drop(data_observers);
        a.defer_drop(close_observers);

        clear_expanded(a, graph);
        if let Some((host, _)) = host {
            if let Some(host) = a.node_mut(host) {
                host.filters_upstream.retain(|f| f.stream != id);
                host.filters_downstream.retain(|f| f.stream != id);
            }
        }
        // Filters left behind stand on their own again.
        for filter in &filters {
            if let Some(node) = a.node_mut(filter.stream) {
                node.filter_of = None;
                a.add_root(graph, filter.stream);
            }
        }

        a.remove_root(graph, id);
        let empty = a.graphs.get(graph).is_some_and(|g| g.roots.is_empty());
        if empty {
            a.retire_graph(graph);
        } else {
            expand(a, graph);
        }
        a.free_if_unused(id);

        Some(
            filters
                .into_iter()
                .filter(|f| f.delete_with_stream)
                .map(|f| f.stream)
                .collect::<Vec<_>>(),
        )
    });
    trace!("stream: released {}", id);

    for filter in owned.unwrap_or_default() {
        release(core, filter);
    }
}
