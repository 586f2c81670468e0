//! Sink that hands bytes to another thread over a crossbeam channel.

use crate::stream::{Resource, StreamRef};
use crossbeam_channel::{Sender, TrySendError};

/// Sends each accepted buffer as one message.
///
/// A full channel is backpressure: `put` accepts nothing and the engine
/// queues the bytes until [`StreamRef::retry`] is called. A disconnected
/// receiver closes the stream.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Vec<u8>>,
    sent: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<Vec<u8>>) -> Self {
        Self { tx, sent: 0 }
    }

    /// Messages sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Resource for ChannelSink {
    fn name(&self) -> &str {
        "channel-sink"
    }

    fn put(&mut self, stream: &StreamRef, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        match self.tx.try_send(buf.to_vec()) {
            Ok(()) => {
                self.sent += 1;
                buf.len()
            }
            Err(TrySendError::Full(_)) => 0,
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("ChannelSink receiver gone after {} messages", self.sent);
                stream.close(true);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_full_channel_accepts_nothing() {
        let (tx, rx) = bounded(1);
        let mut sink = ChannelSink::new(tx);
        let stream = StreamRef::detached();

        assert_eq!(sink.put(&stream, b"one"), 3);
        assert_eq!(sink.put(&stream, b"two"), 0);
        assert_eq!(rx.try_recv().unwrap(), b"one");
        assert_eq!(sink.put(&stream, b"two"), 3);
        assert_eq!(sink.sent(), 2);
    }

    #[test]
    fn test_disconnected_receiver() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        assert_eq!(sink.put(&StreamRef::detached(), b"lost"), 0);
        assert_eq!(sink.sent(), 0);
    }
}
