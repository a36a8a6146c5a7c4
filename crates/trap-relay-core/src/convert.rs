//! Canonical JSON conversion of trap events.
//!
//! `convert` is a pure function: no I/O, never fails, any event is
//! representable. Key order in the `variables` object equals the input
//! binding order, which keeps the output bit-compatible for golden tests.
//!
//! Security names are treated as UTF-8 where valid; invalid byte sequences
//! are replaced with U+FFFD. All strings are JSON-escaped, covering quotes,
//! backslashes and control characters below 0x20.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::event::{ConvertedMessage, TrapEvent};

/// Timestamp format: ISO-8601 with milliseconds and numeric offset,
/// e.g. `2024-01-01T00:00:00.000+0000`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Convert a trap event, stamping it with the current time.
pub fn convert(event: &TrapEvent) -> ConvertedMessage {
    convert_at(event, Utc::now())
}

/// Convert a trap event with an explicit timestamp.
///
/// Split out from [`convert`] so tests can pin the clock and compare
/// golden output byte for byte.
pub fn convert_at(event: &TrapEvent, timestamp: DateTime<Utc>) -> ConvertedMessage {
    let mut root = Map::new();
    root.insert(
        "trapSrc".to_string(),
        Value::String(event.peer_address.clone()),
    );
    root.insert(
        "timestamp".to_string(),
        Value::String(timestamp.format(TIMESTAMP_FORMAT).to_string()),
    );
    root.insert(
        "secLevel".to_string(),
        Value::String(event.security_level.to_string()),
    );
    root.insert(
        "secModel".to_string(),
        Value::String(event.security_model.to_string()),
    );
    root.insert(
        "secName".to_string(),
        Value::String(String::from_utf8_lossy(&event.security_name).into_owned()),
    );

    let mut variables = Map::new();
    for binding in &event.bindings {
        variables.insert(binding.oid.clone(), Value::String(binding.value.clone()));
    }
    root.insert("variables".to_string(), Value::Object(variables));

    // Value's Display renders compact JSON and escapes every control
    // character, so the result is guaranteed to be a single line.
    ConvertedMessage::from_line(Value::Object(root).to_string())
}
