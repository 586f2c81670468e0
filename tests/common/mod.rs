//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use netloom::StreamRef;
use std::cell::RefCell;
use std::rc::Rc;

/// Collect every buffer delivered to `stream`'s data observers.
pub fn record_data(stream: &StreamRef) -> Rc<RefCell<Vec<u8>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    stream.on_data(move |_, buf| sink.borrow_mut().extend_from_slice(buf));
    seen
}

/// Count close notifications for `stream`.
pub fn count_closes(stream: &StreamRef) -> Rc<RefCell<usize>> {
    let count = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&count);
    stream.on_close(move |_| *counter.borrow_mut() += 1);
    count
}

/// Assert bytes match, printing both sides as text on failure.
pub fn assert_bytes_eq(actual: &[u8], expected: &[u8]) {
    assert!(
        actual == expected,
        "Expected {:?} but got {:?}",
        String::from_utf8_lossy(expected),
        String::from_utf8_lossy(actual)
    );
}
