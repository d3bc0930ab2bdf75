//! Message and Chat domain types.
//!
//! These are the core value objects that flow through the system:
//! a user message arrives → the engine assembles context → the provider
//! generates a response (possibly via tool calls) → the turn is persisted.
//!
//! A `Message` is immutable after creation except for the `summarized`
//! flag, which transitions one way (`false → true`) when the compaction
//! worker folds the message into the chat's rolling summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a chat (conversation thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (caller prompt, injected summary)
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    /// Whether this role counts toward the compaction threshold.
    /// Tool and system messages are excluded from compaction entirely.
    pub fn is_conversational(self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// A single message in a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// The chat this message belongs to
    pub chat_id: ChatId,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Creation order within the chat, assigned by the store on append.
    /// Monotonic per chat — not wall-clock, since several messages in
    /// one turn can share a timestamp.
    #[serde(default)]
    pub seq: i64,

    /// Whether this message has been folded into the chat summary.
    #[serde(default)]
    pub summarized: bool,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(chat_id: ChatId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            seq: 0,
            summarized: false,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::new(chat_id, Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::new(chat_id, Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::new(chat_id, Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(
        chat_id: ChatId,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(chat_id, Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call (matches the provider's tool_call.id)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

/// A chat is a persisted conversation thread containing ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique chat ID
    pub id: ChatId,

    /// Optional title (auto-generated or user-set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// When this chat was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ChatId::new(),
            title,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The rolling narrative summary attached to a chat.
///
/// Each compaction run produces a new version that replaces the previous
/// one wholesale — no history is retained. The summary never references
/// messages still marked `summarized = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let chat = ChatId::new();
        let msg = Message::user(chat.clone(), "Hello there");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello there");
        assert_eq!(msg.chat_id, chat);
        assert!(!msg.summarized);
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result(ChatId::new(), "call_42", "output text");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_42"));
    }

    #[test]
    fn conversational_roles() {
        assert!(Role::User.is_conversational());
        assert!(Role::Assistant.is_conversational());
        assert!(!Role::Tool.is_conversational());
        assert!(!Role::System.is_conversational());
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::user(ChatId::from("chat_1"), "Test message");
        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.content, "Test message");
        assert_eq!(deserialized.role, Role::User);
        assert_eq!(deserialized.chat_id, ChatId::from("chat_1"));
    }
}
