//! Serializable picture of a graph, for debugging and tests.

use crate::stream::arena::{Arena, FilterDirection, StreamState};
use crate::stream::id::{GraphId, LinkId, StreamId};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub id: GraphId,
    pub epoch: u64,
    pub expanded: bool,
    pub roots: Vec<StreamId>,
    pub roots_expanded: Vec<StreamId>,
    pub streams: Vec<StreamSnapshot>,
    pub links: Vec<LinkSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub id: StreamId,
    pub name: String,
    pub state: StreamState,
    pub transparent: bool,
    pub busy: bool,
    pub queueing: bool,
    pub front_queued: usize,
    pub back_queued: usize,
    pub filter_of: Option<(StreamId, FilterDirection)>,
    pub filters_upstream: Vec<StreamId>,
    pub filters_downstream: Vec<StreamId>,
    /// Expanded successors.
    pub next: Vec<StreamId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub id: LinkId,
    pub from: StreamId,
    pub to: StreamId,
    pub bytes_left: Option<usize>,
    pub delete_source: bool,
}

impl GraphSnapshot {
    pub(crate) fn capture(arena: &Arena, graph: GraphId) -> Option<Self> {
        let state = arena.graphs.get(graph)?;

        let streams: Vec<StreamSnapshot> = arena
            .nodes
            .iter()
            .filter(|(_, node)| node.graph == graph)
            .map(|(id, node)| StreamSnapshot {
                id,
                name: node.name.clone(),
                state: node.state,
                transparent: node.transparent,
                busy: node.is_busy(),
                queueing: node.queueing,
                front_queued: node.front_queue.data_bytes(),
                back_queued: node.back_queue.data_bytes(),
                filter_of: node.filter_of,
                filters_upstream: node.filters_upstream.iter().map(|f| f.stream).collect(),
                filters_downstream: node.filters_downstream.iter().map(|f| f.stream).collect(),
                next: node.next_expanded.iter().map(|e| e.peer).collect(),
            })
            .collect();

        let links = arena
            .links
            .iter()
            .filter(|(_, link)| arena.graph_of(link.from) == Some(graph))
            .map(|(id, link)| LinkSnapshot {
                id,
                from: link.from,
                to: link.to,
                bytes_left: link.bytes_left,
                delete_source: link.delete_source,
            })
            .collect();

        Some(Self {
            id: graph,
            epoch: state.epoch,
            expanded: state.expanded,
            roots: state.roots.clone(),
            roots_expanded: state.roots_expanded.clone(),
            streams,
            links,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamSnapshot> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn is_root(&self, id: StreamId) -> bool {
        self.roots.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::resource::Pipe;

    #[test]
    fn test_capture_singleton() {
        let mut arena = Arena::new();
        let id = arena.create_node(Box::new(Pipe));
        let graph = arena.graph_of(id).expect("graph");

        let snapshot = GraphSnapshot::capture(&arena, graph).expect("snapshot");
        assert!(snapshot.is_root(id));
        assert_eq!(snapshot.streams.len(), 1);
        assert!(snapshot.links.is_empty());

        let stream = snapshot.stream(id).expect("stream");
        assert_eq!(stream.name, "pipe");
        assert_eq!(stream.state, StreamState::Open);
        assert!(stream.transparent);
    }

    #[test]
    fn test_to_json() {
        let mut arena = Arena::new();
        let id = arena.create_node(Box::new(Pipe));
        let graph = arena.graph_of(id).expect("graph");
        let json = GraphSnapshot::capture(&arena, graph)
            .expect("snapshot")
            .to_json()
            .expect("json");

        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["streams"][0]["name"], "pipe");
        assert_eq!(value["streams"][0]["state"], "open");
    }
}
