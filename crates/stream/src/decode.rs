//! Decode stream message bodies into [`Event`]s.

use serde_json::Value;

use sluice_core::Event;

use crate::client::StreamMessage;
use crate::error::StreamError;

/// Decode a single stream message into an [`Event`].
///
/// The body must be a JSON object. When it carries a `payload` key that
/// value becomes the event payload (and must itself be an object); otherwise
/// the whole body is the payload. The stream offset becomes the event id.
pub fn decode_event(msg: &StreamMessage) -> Result<Event, StreamError> {
    let json: Value = serde_json::from_str(&msg.data).map_err(|e| {
        StreamError::Decode(format!("invalid JSON at offset {}: {}", msg.offset, e))
    })?;

    let Value::Object(mut body) = json else {
        return Err(not_an_object(msg.offset));
    };

    let payload = match body.remove("payload") {
        Some(Value::Object(payload)) => payload,
        Some(Value::Null) | None => body,
        Some(_) => return Err(not_an_object(msg.offset)),
    };

    Ok(Event::new(msg.offset, payload))
}

fn not_an_object(offset: i64) -> StreamError {
    StreamError::Decode(format!("payload at offset {offset} must be a JSON object"))
}
