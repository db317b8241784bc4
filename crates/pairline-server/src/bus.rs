//! Fan-out of stream events to every attached observer.
//!
//! The bus owns the process-wide [`SessionSnapshot`]. Replacing it and
//! delivering the matching event happen under one lock, and so does replaying
//! it to a new subscriber, so a late joiner sees the snapshot followed by
//! every later event with no gap and no duplicate.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use pairline_core::{SessionSnapshot, SinkError, StreamEvent, SubscriberId};

use crate::sink::{ChannelSink, EventSink};

struct BusState {
    snapshot: SessionSnapshot,
    subscribers: HashMap<SubscriberId, Arc<dyn EventSink>>,
}

pub struct EventBus {
    state: Mutex<BusState>,
    max_send_queue: usize,
}

impl EventBus {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                snapshot: SessionSnapshot::initializing(),
                subscribers: HashMap::new(),
            }),
            max_send_queue,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Replace the snapshot and deliver `event` to every subscriber.
    ///
    /// Subscribers whose sink rejects the event are removed; the rest still
    /// receive it.
    pub fn publish(&self, snapshot: SessionSnapshot, event: StreamEvent) {
        let mut state = self.state.lock();
        state.snapshot = snapshot;

        let failed: Vec<(SubscriberId, SinkError)> = state
            .subscribers
            .iter()
            .filter_map(|(id, sink)| sink.try_deliver(&event).err().map(|e| (id.clone(), e)))
            .collect();

        for (id, error) in failed {
            state.subscribers.remove(&id);
            warn!(subscriber = %id, error = %error, "dropping subscriber");
        }
    }

    /// Replay the current snapshot into `sink`, then register it for live
    /// events.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> Result<SubscriberId, SinkError> {
        let mut state = self.state.lock();
        for event in StreamEvent::replay(&state.snapshot) {
            sink.try_deliver(&event)?;
        }
        let id = SubscriberId::new();
        state.subscribers.insert(id.clone(), sink);
        debug!(subscriber = %id, total = state.subscribers.len(), "subscriber attached");
        Ok(id)
    }

    /// Subscribe through a bounded channel of `max_send_queue` events. The
    /// returned handle unsubscribes when dropped.
    pub fn subscribe_channel(self: &Arc<Self>) -> Result<Subscription, SinkError> {
        let (sink, rx) = ChannelSink::new(self.max_send_queue);
        let id = self.subscribe(Arc::new(sink))?;
        Ok(Subscription {
            id,
            rx,
            bus: Arc::clone(self),
        })
    }

    /// Remove a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let mut state = self.state.lock();
        let removed = state.subscribers.remove(id).is_some();
        if removed {
            debug!(subscriber = %id, total = state.subscribers.len(), "subscriber detached");
        }
        removed
    }
}

/// Live feed of one channel subscriber.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<StreamEvent>,
    bus: Arc<EventBus>,
}

impl Subscription {
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Next event; `None` once the bus dropped this subscriber.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.id);
    }
}
