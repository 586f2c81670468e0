//! Property tests: bytes are never lost, duplicated or reordered

mod common;

use common::builders::{engine, tagging, SinkBuilder};
use netloom::config::TraversalMode;
use netloom::stream::{Retry, Stream};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Write(Vec<u8>),
    Retry,
    ToggleScope,
    SetLimit(Option<usize>),
    /// Link a pipe into the sink, or close the linked one. Writes go
    /// through the pipe while it is linked.
    TogglePipe,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => prop::collection::vec(any::<u8>(), 1..24).prop_map(Op::Write),
        1 => Just(Op::Retry),
        1 => Just(Op::ToggleScope),
        1 => prop::option::of(1usize..8).prop_map(Op::SetLimit),
        1 => Just(Op::TogglePipe),
    ]
}

fn traversal() -> impl Strategy<Value = TraversalMode> {
    prop_oneof![Just(TraversalMode::Recursive), Just(TraversalMode::Worklist)]
}

proptest! {
    #[test]
    fn writes_arrive_in_order(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 0..20),
        limit in 1usize..16,
    ) {
        let engine = engine(TraversalMode::Recursive);
        let (sink, received) = SinkBuilder::new().limit(limit).build(&engine);

        for chunk in &chunks {
            prop_assert_eq!(sink.write(chunk), chunk.len());
        }
        received.set_limit(None);
        sink.retry(Retry::Now);

        prop_assert_eq!(received.bytes(), chunks.concat());
        prop_assert_eq!(sink.queued_bytes(), Some(0));
    }

    #[test]
    fn mixed_operations_preserve_order(ops in prop::collection::vec(op(), 0..40), mode in traversal()) {
        let engine = engine(mode);
        let (sink, received) = SinkBuilder::new().build(&engine);
        let mut expected = Vec::new();
        let mut scope_open = false;
        let mut pipe: Option<Stream> = None;

        for op in ops {
            match op {
                Op::Write(bytes) => {
                    match &pipe {
                        Some(pipe) => pipe.write(&bytes),
                        None => sink.write(&bytes),
                    };
                    expected.extend_from_slice(&bytes);
                }
                Op::Retry => sink.retry(Retry::Now),
                Op::ToggleScope => {
                    if scope_open {
                        sink.end_queue();
                    } else {
                        sink.begin_queue();
                    }
                    scope_open = !scope_open;
                }
                Op::SetLimit(limit) => received.set_limit(limit),
                Op::TogglePipe => match pipe.take() {
                    Some(linked) => {
                        linked.close(true);
                    }
                    // Only link while nothing is pending, so the pipe is
                    // linked right away instead of queued as a redirect.
                    None if !scope_open && sink.queued_bytes() == Some(0) => {
                        let fresh = engine.pipe();
                        sink.write_from(&fresh, None, false);
                        pipe = Some(fresh);
                    }
                    None => {}
                },
            }
            // Whatever arrived so far is a prefix of what was written.
            let so_far = received.bytes();
            prop_assert!(expected.starts_with(&so_far));
        }

        if scope_open {
            sink.end_queue();
        }
        if let Some(linked) = pipe.take() {
            linked.close(true);
        }
        received.set_limit(None);
        sink.retry(Retry::Now);
        prop_assert_eq!(received.bytes(), expected);
        prop_assert_eq!(sink.queued_bytes(), Some(0));
    }

    #[test]
    fn queue_scope_holds_producer_bytes(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 1..10),
        mode in traversal(),
    ) {
        let engine = engine(mode);
        let (sink, received) = SinkBuilder::new().build(&engine);
        let pipe = engine.pipe();
        sink.write_from(&pipe, None, false);

        sink.begin_queue();
        for chunk in &chunks {
            pipe.write(chunk);
            prop_assert!(received.is_empty());
        }
        sink.end_queue();
        prop_assert_eq!(received.bytes(), chunks.concat());
    }

    #[test]
    fn upstream_filters_apply_most_recent_first(
        tags in prop::collection::vec(b'a'..=b'z', 1..6),
        payload in prop::collection::vec(b'0'..=b'9', 1..8),
    ) {
        let engine = engine(TraversalMode::Recursive);
        let mut builder = SinkBuilder::new();
        for tag in &tags {
            builder = builder.filter(tagging(*tag));
        }
        let (sink, received) = builder.build(&engine);

        sink.write(&payload);

        let mut expected = payload.clone();
        expected.extend(tags.iter().rev());
        prop_assert_eq!(received.bytes(), expected);
    }

    #[test]
    fn bounded_relay_moves_exactly_count(
        data in prop::collection::vec(any::<u8>(), 1..64),
        count in 0usize..80,
        chunk in 1usize..10,
    ) {
        let engine = engine(TraversalMode::Worklist);
        let source = engine
            .stream(netloom::adapters::MemorySource::new(data.clone()).with_chunk_size(chunk))
            .into_ref();
        let (sink, received) = SinkBuilder::new().build(&engine);

        sink.write_from(&source, Some(count), true);

        let moved = count.min(data.len());
        prop_assert_eq!(received.bytes(), data[..moved].to_vec());
        // The source is deleted once its budget is met.
        prop_assert_eq!(source.is_alive(), count > data.len());
    }
}
