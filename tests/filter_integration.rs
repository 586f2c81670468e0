//! Integration tests for upstream/downstream filters and observers

mod common;

use common::builders::{engines, tagging, SinkBuilder};
use common::record_data;
use netloom::adapters::{MemorySource, Transform};
use netloom::stream::{Engine, FilterOptions, StreamState};

#[test]
fn test_transparent_pipe_passes_bytes_unchanged() {
    let engine = Engine::new();
    let pipe = engine.pipe();
    let seen = record_data(&pipe);

    assert_eq!(pipe.write(b"AAA"), 3);
    assert_eq!(seen.borrow().as_slice(), b"AAA");
}

#[test]
fn test_observed_pipe_still_forwards() {
    for engine in engines() {
        let pipe = engine.pipe();
        let (sink, received) = SinkBuilder::new().build(&engine);
        sink.write_from(&pipe, None, false);
        let seen = record_data(&pipe);

        pipe.write(b"AAA");
        assert_eq!(seen.borrow().as_slice(), b"AAA");
        assert_eq!(received.text(), "AAA");
    }
}

#[test]
fn test_plus_one_filter() {
    let engine = Engine::new();
    let (sink, received) = SinkBuilder::new()
        .filter(Transform::preset("plus-one").unwrap())
        .build(&engine);

    sink.write(&[0x41, 0x41, 0x41]);
    assert_eq!(received.bytes(), vec![0x42, 0x42, 0x42]);
}

#[test]
fn test_most_recent_upstream_filter_acts_first() {
    for engine in engines() {
        let (sink, received) = SinkBuilder::new()
            .filter(tagging(b'1'))
            .filter(tagging(b'2'))
            .filter(tagging(b'3'))
            .build(&engine);

        sink.write(b"x");
        assert_eq!(received.text(), "x321");
    }
}

#[test]
fn test_downstream_filter_on_source() {
    for engine in engines() {
        let source = engine.stream(MemorySource::new("abc"));
        let upper = engine.stream(Transform::preset("upper").unwrap());
        assert!(source.add_filter_downstream(&upper, FilterOptions::default()));

        let (sink, received) = SinkBuilder::new().build(&engine);
        sink.write_from(&source, None, false);
        assert_eq!(received.text(), "ABC");

        // Exhausted unbounded link detaches; the sink stands alone again.
        let snapshot = sink.snapshot().expect("snapshot");
        assert!(snapshot.is_root(sink.id()));
        assert!(snapshot.links.is_empty());
    }
}

#[test]
fn test_observers_see_downstream_output() {
    let engine = Engine::new();
    let pipe = engine.pipe();
    let lower = engine.stream(Transform::preset("lower").unwrap());
    pipe.add_filter_downstream(&lower, FilterOptions::default());
    let seen = record_data(&pipe);

    pipe.write(b"LOUD");
    assert_eq!(seen.borrow().as_slice(), b"loud");
}

#[test]
fn test_remove_filter() {
    let engine = Engine::new();
    let (sink, received) = SinkBuilder::new().build(&engine);
    let upper = engine.stream(Transform::preset("upper").unwrap());

    assert!(sink.add_filter_upstream(&upper, FilterOptions::default()));
    sink.write(b"a");
    assert!(sink.remove_filter(&upper));
    assert!(!sink.remove_filter(&upper));
    sink.write(b"b");

    assert_eq!(received.text(), "Ab");
    assert!(upper.snapshot().expect("snapshot").is_root(upper.id()));
}

#[test]
fn test_remove_unknown_filter_is_noop() {
    let engine = Engine::new();
    let (sink, _) = SinkBuilder::new().build(&engine);
    let stranger = engine.pipe();
    assert!(!sink.remove_filter(&stranger));
}

#[test]
fn test_filter_cycles_rejected() {
    let engine = Engine::new();
    let a = engine.pipe();
    let b = engine.pipe();
    let c = engine.pipe();
    let options = FilterOptions::default();

    assert!(!a.add_filter_upstream(&a, options));
    assert!(a.add_filter_upstream(&b, options));
    // b already sits above a.
    assert!(!b.add_filter_upstream(&a, options));
    // b is taken.
    assert!(!c.add_filter_downstream(&b, options));
}

#[test]
fn test_filter_joins_host_graph() {
    let engine = Engine::new();
    let host = engine.pipe();
    let filter = engine.pipe();
    assert_eq!(engine.graph_count(), 2);

    host.add_filter_upstream(&filter, FilterOptions::default());
    assert_eq!(engine.graph_count(), 1);
    assert_eq!(host.graph_id(), filter.graph_id());

    let snapshot = host.snapshot().expect("snapshot");
    assert!(!snapshot.is_root(filter.id()));
    let staged = snapshot.stream(host.id()).expect("host");
    assert_eq!(staged.filters_upstream, vec![filter.id()]);
}

#[test]
fn test_close_together() {
    let engine = Engine::new();
    let (sink, _) = SinkBuilder::new().build(&engine);
    let upper = engine.stream(Transform::preset("upper").unwrap());
    let options = FilterOptions {
        delete_with_stream: false,
        close_together: true,
    };
    sink.add_filter_upstream(&upper, options);

    assert!(sink.close(true));
    assert_eq!(upper.state(), Some(StreamState::Closed));
}

#[test]
fn test_delete_with_stream() {
    let engine = Engine::new();
    let (sink, _) = SinkBuilder::new()
        .filter(tagging(b'1'))
        .filter(tagging(b'2'))
        .build(&engine);
    assert_eq!(engine.stream_count(), 3);

    drop(sink);
    assert_eq!(engine.stream_count(), 0);
    assert_eq!(engine.graph_count(), 0);
}

#[test]
fn test_filter_survives_host_without_delete_flag() {
    let engine = Engine::new();
    let (sink, _) = SinkBuilder::new().build(&engine);
    let upper = engine.stream(Transform::preset("upper").unwrap());
    sink.add_filter_upstream(&upper, FilterOptions::default());

    drop(sink);
    assert!(upper.is_alive());
    assert_eq!(upper.state(), Some(StreamState::Open));
    assert!(upper.snapshot().expect("snapshot").is_root(upper.id()));
}

#[test]
fn test_data_observer_removal() {
    let engine = Engine::new();
    let pipe = engine.pipe();
    let seen = std::rc::Rc::new(std::cell::RefCell::new(0usize));
    let counter = std::rc::Rc::clone(&seen);
    let id = pipe
        .on_data(move |_, buf| *counter.borrow_mut() += buf.len())
        .expect("observer");

    pipe.write(b"abc");
    assert!(pipe.remove_data_observer(id));
    assert!(!pipe.remove_data_observer(id));
    pipe.write(b"def");
    assert_eq!(*seen.borrow(), 3);
}
