//! Outbound control messages written to the child's stdin.
//!
//! Each message serialises to one compact JSON object; the session appends
//! the `\n` delimiter when writing, so a serialised message must never
//! contain an embedded newline (guaranteed by compact serialisation).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Nested payload of a [`ControlMessage::User`] message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserMessage {
    /// Message role; always `"user"` for messages the relay originates.
    pub role: String,
    /// The user's message text.
    pub content: String,
}

/// An outbound JSON object for the child's stdin.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// The initial user message that starts an exchange.
    User {
        /// Nested role/content payload.
        message: UserMessage,
    },
    /// Grant or deny a pending tool-use permission request.
    PermissionResponse {
        /// Identifier of the tool use being answered.
        tool_use_id: String,
        /// Whether the tool use is allowed.
        allowed: bool,
    },
    /// Answers to a survey the assistant asked.
    QuestionResponse {
        /// Question identifier → answer value.
        answers: BTreeMap<String, Value>,
    },
    /// Resume processing; carries no payload.
    Continue,
}

impl ControlMessage {
    /// Build the initial `user` message for `content`.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::User {
            message: UserMessage {
                role: "user".into(),
                content: content.to_owned(),
            },
        }
    }
}
