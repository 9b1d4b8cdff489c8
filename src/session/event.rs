//! Events yielded by a session's output stream.

use serde_json::{json, Value};

/// One structured unit of output from the child process.
///
/// Assistant messages pass through verbatim; the two `system` variants fold
/// parse glitches and fatal failures into the same stream so the consumer
/// always drains a sequence to completion instead of handling faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A JSON object emitted by the child, passed through as-is.
    Message(Value),
    /// A stdout line that was not valid JSON.
    Raw {
        /// The offending line, exactly as received (after lossy decoding).
        content: String,
        /// The JSON parse error.
        error: String,
    },
    /// A fatal failure of the current run (spawn error, broken pipe, …).
    Error {
        /// Human-readable failure description.
        content: String,
    },
}

impl SessionEvent {
    /// Wire representation sent to relay clients.
    ///
    /// `Message` serialises to the child's object unchanged; the system
    /// variants use `{"type":"system","subtype":…}` envelopes.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Message(value) => value,
            Self::Raw { content, error } => json!({
                "type": "system",
                "subtype": "raw",
                "content": content,
                "error": error,
            }),
            Self::Error { content } => json!({
                "type": "system",
                "subtype": "error",
                "content": content,
            }),
        }
    }

    /// True when this event signals normal end of the current exchange.
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(
            self,
            Self::Message(value) if value.get("type").and_then(Value::as_str) == Some("result")
        )
    }
}
