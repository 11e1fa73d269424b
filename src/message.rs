//! Conversational messages recorded in the session state document.
//!
//! The engine maintains `data.messages` as a by-product of execution: user
//! input submissions append `user` messages, reply utilities and suspension
//! prompts append `assistant` messages. Messages are never reordered.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::now_millis;

/// A single message in a session's conversation history.
///
/// # Examples
///
/// ```rust
/// use trellis::message::ChatMessage;
///
/// let msg = ChatMessage::assistant("How can I help?");
/// assert_eq!(msg.role, ChatMessage::ASSISTANT);
/// assert!(msg.id.is_some());
///
/// let json = serde_json::to_string(&msg).unwrap();
/// let back: ChatMessage = serde_json::from_str(&json).unwrap();
/// assert_eq!(msg, back);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The sender role, typically `"user"` or `"assistant"`.
    pub role: String,
    /// The message text.
    pub content: String,
    /// Append time as epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Short correlation id; absent on messages written by older versions.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ChatMessage {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// Assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";

    /// Creates a message with the given role and content, stamped now.
    #[must_use]
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            timestamp: now_millis(),
            id: Some(short_id()),
        }
    }

    /// Creates a user message stamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message stamped now.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// Eight hex characters of a fresh UUID, enough to correlate log lines.
fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
