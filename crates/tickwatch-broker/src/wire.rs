//! Subject naming and message body encoding.
//!
//! Every event type maps to exactly one subject under the configured
//! prefix, and the body is always a JSON object.

use tickwatch_types::{EventType, Payload};

/// Content type header sent with every event.
pub const CONTENT_TYPE: &str = "application/json";

/// Subject an event type is published on: `<prefix>.<wire name>`.
pub fn subject(prefix: &str, event_type: EventType) -> String {
    format!("{prefix}.{}", event_type.as_str())
}

/// Wildcard subject the stream captures: `<prefix>.>`.
pub fn stream_subjects(prefix: &str) -> String {
    format!("{prefix}.>")
}

/// Durable consumer name for a shared group.
pub fn consumer_name(group: &str, event_type: EventType) -> String {
    // Durable names may not contain '.', '*', or '>'.
    let group: String = group
        .chars()
        .map(|c| if matches!(c, '.' | '*' | '>' | ' ') { '_' } else { c })
        .collect();
    format!("{group}_{}", event_type.as_str())
}

/// Serialize a payload as a JSON object.
pub fn encode(payload: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

/// Parse a message body. An empty body is an empty payload; anything that
/// is not a JSON object is rejected.
pub fn decode(body: &[u8]) -> Result<Payload, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::new());
    }
    serde_json::from_slice(body)
}
