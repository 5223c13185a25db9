use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source-scoped event identifier. Strictly increasing within a source.
pub type EventId = i64;

/// Opaque structured event body (always a JSON object).
pub type Payload = Map<String, Value>;

/// An ordered, source-scoped event as produced by an [`EventSource`](crate::EventSource).
///
/// Events are immutable once created by the source adapter; everything
/// downstream only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    payload: Payload,
}

impl Event {
    pub fn new(id: EventId, payload: Payload) -> Self {
        Self { id, payload }
    }

    /// Event with an empty payload.
    pub fn empty(id: EventId) -> Self {
        Self::new(id, Payload::new())
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_parts(self) -> (EventId, Payload) {
        (self.id, self.payload)
    }
}
