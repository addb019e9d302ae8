//! Frames handed over by another task, e.g. a bridge from some other transport or a
//! test harness.

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::core::errors::TransportError;
use crate::ingestors::{Frame, FrameSource};

/// Polls an MPSC receiver without waiting.
pub struct ChannelFrameSource {
    receiver: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    /// Creates a source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<Frame>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver })
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.receiver.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed("frame channel has no senders".into())),
        }
    }

    async fn close(&mut self) {
        self.receiver.close();
    }

    fn describe(&self) -> String {
        "in-process channel".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_then_frame_then_closed() {
        let (tx, mut source) = ChannelFrameSource::new(4);
        assert!(source.next_frame().await.unwrap().is_none());

        tx.send(Frame::from_static(b"{}")).await.unwrap();
        assert_eq!(source.next_frame().await.unwrap().unwrap(), Frame::from_static(b"{}"));

        drop(tx);
        assert!(matches!(source.next_frame().await, Err(TransportError::Closed(_))));
    }
}
