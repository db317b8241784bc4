//! Delivery endpoints registered on the [`EventBus`](crate::bus::EventBus).

use tokio::sync::mpsc;

use pairline_core::{SinkError, StreamEvent};

/// A subscriber's transport. Delivery must never block: the bus calls this
/// while holding its lock.
pub trait EventSink: Send + Sync {
    fn try_deliver(&self, event: &StreamEvent) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel; the receiving half feeds one SSE
/// response.
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn try_deliver(&self, event: &StreamEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
