use tokio::sync::broadcast;

use crate::DecoderEvent;

/// Event bus between a decode session and its subscribers.
///
/// `publish()` is a sync call and never blocks, so the blocking decode
/// thread can use it directly. Slow subscribers receive
/// `RecvError::Lagged(n)` instead of stalling the producer; with no
/// subscribers events are silently dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DecoderEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: DecoderEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.tx.subscribe()
    }
}
