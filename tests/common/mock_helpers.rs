//! Mock construction helpers

use mockall::mock;
use netloom::{Resource, StreamRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mock! {
    pub Backing {}

    impl Resource for Backing {
        fn put(&mut self, stream: &StreamRef, buf: &[u8]) -> usize;
        fn bytes_left(&self) -> Option<usize>;
        fn read(&mut self, stream: &StreamRef, hint: Option<usize>);
    }
}

/// A mock sink that accepts everything and never produces.
pub fn accepting_sink() -> MockBacking {
    let mut mock = MockBacking::new();
    mock.expect_put().returning(|_, buf| buf.len());
    mock.expect_bytes_left().return_const(None);
    mock
}

/// A mock source that emits `chunk` on its first read and reports
/// exhaustion from then on.
pub fn one_shot_source(chunk: &'static [u8]) -> MockBacking {
    let emitted = Arc::new(AtomicBool::new(false));
    let mut mock = MockBacking::new();

    let flag = Arc::clone(&emitted);
    mock.expect_read().returning(move |stream, _| {
        if !flag.swap(true, Ordering::SeqCst) {
            stream.data(chunk);
        }
    });
    mock.expect_bytes_left().returning(move || {
        if emitted.load(Ordering::SeqCst) {
            Some(0)
        } else {
            Some(chunk.len())
        }
    });
    mock
}
