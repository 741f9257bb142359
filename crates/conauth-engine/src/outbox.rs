//! Outbox for engine events.
//!
//! Side-effecting transitions push their events here. The sink is
//! fire-and-forget by contract: a sink that cannot deliver must swallow the
//! failure (logging it), never propagate it, so delivery problems cannot
//! roll back the state transition that produced the event.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::events::EventEnvelope;

/// A sink for events emitted by engine operations.
///
/// Intentionally synchronous: transitions stay deterministic and
/// side-effect free, while sink implementations decide when and how to
/// deliver.
pub trait EventSink: Send {
    /// Records an event for later delivery.
    fn push(&mut self, event: EventEnvelope);
}

/// A shared, thread-safe handle to an event sink.
///
/// The engine and the scheduler emit concurrently; this wraps any sink for
/// shared use.
pub type SharedSink = Arc<Mutex<Box<dyn EventSink>>>;

/// Wraps a sink for shared use by the engine and scheduler.
#[must_use]
pub fn shared(sink: impl EventSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Pushes an event through a shared sink.
///
/// A poisoned sink lock is logged and the event dropped; emission never
/// fails the calling transition.
pub fn emit(sink: &SharedSink, event: EventEnvelope) {
    match sink.lock() {
        Ok(mut guard) => guard.push(event),
        Err(_) => tracing::warn!("event sink lock poisoned, dropping event"),
    }
}

/// In-memory outbox for collecting events.
#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    events: Vec<EventEnvelope>,
}

impl InMemoryOutbox {
    /// Creates a new empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> &[EventEnvelope] {
        &self.events
    }

    /// Drains the outbox, returning all events in insertion order.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for InMemoryOutbox {
    fn push(&mut self, event: EventEnvelope) {
        self.events.push(event);
    }
}

/// A cloneable in-memory outbox whose collected events stay observable
/// after the sink handle has been given away.
///
/// Useful in tests: clone one handle into the engine, keep the other to
/// assert on emitted events.
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryOutbox {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl SharedMemoryOutbox {
    /// Creates a new empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all collected events in insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drains all collected events.
    #[must_use]
    pub fn drain(&self) -> Vec<EventEnvelope> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for SharedMemoryOutbox {
    fn push(&mut self, event: EventEnvelope) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Bridges events onto a tokio channel consumed by the notification sink.
///
/// Send failures (receiver dropped) are logged and swallowed; the emitting
/// transition is never rolled back.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl ChannelSink {
    /// Creates a channel sink and the receiving half for the consumer.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn push(&mut self, event: EventEnvelope) {
        if let Err(err) = self.tx.send(event) {
            tracing::warn!(
                event_type = %err.0.event_type,
                "notification channel closed, dropping event"
            );
        }
    }
}
