use serde::{Deserialize, Serialize};

use super::ids::SessionId;

/// Default session title used until the first completed turn derives one.
pub const DEFAULT_SESSION_TITLE: &str = "New Conversation";

/// Derived titles keep this many characters of the first user message.
pub const TITLE_PREFIX_CHARS: usize = 20;

/// Storage-local message role, intentionally decoupled from chat-layer role
/// enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Token counters recorded on a completed assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// One persisted transcript entry. `content` is the answer channel;
/// `thinking` exists only for assistant messages that streamed reasoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl MessageRecord {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            thinking: None,
            usage: None,
        }
    }

    /// Empty assistant slot inserted before the first byte arrives.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            thinking: None,
            usage: None,
        }
    }
}

/// One persisted conversation: insertion-ordered messages plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub created_at_unix_seconds: u64,
    pub messages: Vec<MessageRecord>,
}

impl SessionRecord {
    pub fn new(id: SessionId, created_at_unix_seconds: u64) -> Self {
        Self {
            id,
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at_unix_seconds,
            messages: Vec::new(),
        }
    }

    /// Returns the first user turn, the source for derived titles.
    pub fn first_user_message(&self) -> Option<&MessageRecord> {
        self.messages
            .iter()
            .find(|message| message.role == MessageRole::User)
    }
}
