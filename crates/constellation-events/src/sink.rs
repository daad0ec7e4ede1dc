//! `EventSink`: the abstract capability the Runner emits progress events to
//! (spec §4.3, §9 "Event stream backpressure"). A missing subscriber is
//! replaced with `NoopEventSink` so emitters never branch on nullability.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::event::RunEvent;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Accepts an event. Implementations MUST NOT block node execution on
    /// delivery (spec §9); dropping on backpressure is acceptable.
    async fn emit(&self, event: RunEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: RunEvent) {}
}

/// `broadcast`-backed sink, grounded on `tandem-core`'s `EventBus`. Cloning
/// shares the same channel; publishing with no subscribers attached is a
/// silent no-op (`broadcast::Sender::send` returning `Err` is ignored, same
/// as the teacher's `EventBus::publish`).
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<RunEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}
