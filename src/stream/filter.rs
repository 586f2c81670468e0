//! Filter attachment.
//!
//! A filter is an ordinary stream staged in front of (upstream) or behind
//! (downstream) its host in the expanded view. It leaves the root set while
//! attached and rejoins it when detached.

use crate::stream::arena::{Core, FilterDirection, FilterSlot};
use crate::stream::graph::{expand, read, swallow};
use crate::stream::id::StreamId;
use std::rc::Rc;
use tracing::{debug, warn};

/// Options for [`add_filter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Delete the filter when the host is deleted.
    pub delete_with_stream: bool,
    /// Close the filter when the host closes.
    pub close_together: bool,
}

pub(crate) fn add_filter(
    core: &Rc<Core>,
    host: StreamId,
    filter: StreamId,
    direction: FilterDirection,
    options: FilterOptions,
) -> bool {
    let graph = core.with(|a| {
        if host == filter || !a.is_live(host) || !a.is_live(filter) {
            return None;
        }
        if a.node(filter)?.filter_of.is_some() {
            return None;
        }
        // The filter must not already sit above the host.
        let mut current = Some(host);
        while let Some(id) = current {
            if id == filter {
                return None;
            }
            current = a.node(id)?.filter_of.map(|(h, _)| h);
        }

        let host_graph = a.graph_of(host)?;
        let filter_graph = a.graph_of(filter)?;
        if host_graph != filter_graph {
            swallow(a, host_graph, filter_graph);
        }

        let slot = FilterSlot {
            stream: filter,
            delete_with_stream: options.delete_with_stream,
            close_together: options.close_together,
        };
        let node = a.node_mut(host)?;
        match direction {
            FilterDirection::Upstream => node.filters_upstream.insert(0, slot),
            FilterDirection::Downstream => node.filters_downstream.push(slot),
        }
        if let Some(node) = a.node_mut(filter) {
            node.filter_of = Some((host, direction));
        }
        a.remove_root(host_graph, filter);
        expand(a, host_graph);
        Some(host_graph)
    });

    match graph {
        Some(graph) => {
            debug!("stream: {} filters {} ({:?})", filter, host, direction);
            read(core, graph);
            true
        }
        None => {
            warn!("stream: rejected filter {} on {}", filter, host);
            false
        }
    }
}

/// Detach `filter` from `host`. Returns false if it was not attached there.
pub(crate) fn remove_filter(core: &Rc<Core>, host: StreamId, filter: StreamId) -> bool {
    let graph = core.with(|a| {
        let node = a.node_mut(host)?;
        let before = node.filters_upstream.len() + node.filters_downstream.len();
        node.filters_upstream.retain(|f| f.stream != filter);
        node.filters_downstream.retain(|f| f.stream != filter);
        if node.filters_upstream.len() + node.filters_downstream.len() == before {
            return None;
        }
        let graph = node.graph;
        if let Some(node) = a.node_mut(filter) {
            node.filter_of = None;
        }
        a.add_root(graph, filter);
        expand(a, graph);
        Some(graph)
    });
    match graph {
        Some(graph) => {
            debug!("stream: removed filter {} from {}", filter, host);
            read(core, graph);
            true
        }
        None => false,
    }
}
