//! Test builders for streams and small graphs

use netloom::adapters::{MemorySink, MemorySource, SinkHandle, Transform};
use netloom::config::{EngineConfig, TraversalMode};
use netloom::stream::{Engine, FilterOptions, Stream};

/// Engine using the given traversal strategy.
pub fn engine(traversal: TraversalMode) -> Engine {
    Engine::with_config(EngineConfig {
        traversal,
        log_topology: true,
    })
}

/// Both traversal strategies, for tests that must hold under either.
pub fn engines() -> [Engine; 2] {
    [
        engine(TraversalMode::Recursive),
        engine(TraversalMode::Worklist),
    ]
}

/// Builder for a memory sink stream with optional upstream transforms
pub struct SinkBuilder {
    limit: Option<usize>,
    blocked: bool,
    filters: Vec<Transform>,
}

impl SinkBuilder {
    pub fn new() -> Self {
        Self {
            limit: None,
            blocked: false,
            filters: Vec::new(),
        }
    }

    /// Accept at most `limit` bytes per put.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }

    /// Attach an upstream transform. Later filters act first.
    pub fn filter(mut self, transform: Transform) -> Self {
        self.filters.push(transform);
        self
    }

    /// Build the sink; filters are deleted along with it.
    pub fn build(self, engine: &Engine) -> (Stream, SinkHandle) {
        let sink = MemorySink::new();
        let handle = sink.handle();
        handle.set_limit(self.limit);
        handle.set_blocked(self.blocked);

        let stream = engine.stream(sink);
        let options = FilterOptions {
            delete_with_stream: true,
            close_together: false,
        };
        for transform in self.filters {
            let filter = engine.stream(transform).into_ref();
            assert!(stream.add_filter_upstream(&filter, options));
        }
        (stream, handle)
    }
}

/// A source stream producing `data`, owned by the graph.
pub fn source(engine: &Engine, data: &str) -> netloom::StreamRef {
    engine.stream(MemorySource::new(data)).into_ref()
}

/// A transform that appends `tag` to every buffer.
pub fn tagging(tag: u8) -> Transform {
    Transform::new(format!("tag-{}", tag as char), move |buf| {
        let mut out = buf.to_vec();
        out.push(tag);
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_builder() {
        let engine = Engine::new();
        let (stream, handle) = SinkBuilder::new().limit(2).build(&engine);
        assert_eq!(stream.write(b"abc"), 3);
        assert_eq!(handle.text(), "ab");
    }
}
