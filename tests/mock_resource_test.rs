//! Engine behaviour against scripted resources

mod common;

use common::builders::SinkBuilder;
use common::mock_helpers::{accepting_sink, one_shot_source, MockBacking};
use netloom::stream::{Engine, Retry, StreamState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_put_sees_exact_bytes() {
    let mut mock = MockBacking::new();
    mock.expect_put()
        .withf(|_, buf| buf == b"exact")
        .times(1)
        .returning(|_, buf| buf.len());

    let engine = Engine::new();
    let stream = engine.stream(mock);
    assert_eq!(stream.write(b"exact"), 5);
}

#[test]
fn test_short_put_resumes_where_it_stopped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(Mutex::new(Vec::new()));

    let mut mock = MockBacking::new();
    let counter = Arc::clone(&calls);
    let log = Arc::clone(&received);
    mock.expect_put().returning(move |_, buf| {
        // The first call only takes two bytes.
        let take = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            2
        } else {
            buf.len()
        };
        log.lock().unwrap().extend_from_slice(&buf[..take]);
        take
    });

    let engine = Engine::new();
    let stream = engine.stream(mock);
    stream.write(b"abcdef");
    assert_eq!(stream.queued_bytes(), Some(4));

    stream.retry(Retry::Now);
    assert_eq!(received.lock().unwrap().as_slice(), b"abcdef");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_queue_scope_never_reaches_put() {
    let mut mock = MockBacking::new();
    mock.expect_put().never();

    let engine = Engine::new();
    let stream = engine.stream(mock);
    stream.begin_queue();
    stream.write(b"held");
    // Dropping the stream discards the scope without delivering.
}

#[test]
fn test_resource_closing_itself_from_put() {
    let mut mock = MockBacking::new();
    mock.expect_put().times(1).returning(|stream, _| {
        stream.close(true);
        0
    });

    let engine = Engine::new();
    let stream = engine.stream(mock);
    stream.write(b"refused");
    assert_eq!(stream.state(), Some(StreamState::Closed));
    assert_eq!(stream.queued_bytes(), Some(0));
    assert_eq!(stream.write(b"again"), 0);
}

#[test]
fn test_source_exhaustion_ends_unbounded_link() {
    let engine = Engine::new();
    let source = engine.stream(one_shot_source(b"xyz"));
    let (sink, received) = SinkBuilder::new().build(&engine);

    sink.write_from(&source, None, false);
    assert_eq!(received.text(), "xyz");
    assert_eq!(source.bytes_left(), Some(0));
    assert_eq!(source.state(), Some(StreamState::Open));
    assert!(sink.snapshot().expect("snapshot").is_root(sink.id()));
}

#[test]
fn test_read_hint_follows_link_budget() {
    let hints = Arc::new(Mutex::new(Vec::new()));
    let mut mock = MockBacking::new();
    let log = Arc::clone(&hints);
    mock.expect_read()
        .returning(move |_, hint| log.lock().unwrap().push(hint));
    mock.expect_bytes_left().return_const(None);

    let engine = Engine::new();
    let source = engine.stream(mock);
    let sink = engine.stream(accepting_sink());
    sink.write_from(&source, Some(7), false);

    assert_eq!(hints.lock().unwrap().first(), Some(&Some(7)));
}
