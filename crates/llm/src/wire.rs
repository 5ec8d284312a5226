use serde::{Deserialize, Serialize};

/// Content type tag carried by text blocks when the upstream spells it out.
pub const TEXT_CONTENT_TYPE: &str = "text";
/// Content type tag carried by reasoning blocks.
pub const THINKING_CONTENT_TYPE: &str = "thinking";

/// One payload record of the upstream event stream.
///
/// Records arrive as `"data: " + <json>` lines; the JSON is internally tagged
/// by `type`. Unknown tags fail deserialization and are treated as malformed
/// by the decoder rather than aborting the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Stream-open marker. Carries no content.
    Start {
        #[serde(default)]
        created: Option<String>,
    },
    /// An ordered batch of content blocks, possibly mixing channels.
    Content { content: Vec<WireContentBlock> },
    /// Token accounting for the turn so far.
    Usage { usage: WireUsage },
    /// Server-reported stream failure.
    Error {
        message: String,
        #[serde(default)]
        code: Option<u16>,
    },
    /// Normal completion of the assistant message.
    MessageStop,
    /// Trailing stream-end marker sent after `message_stop`.
    Done,
}

/// One content block inside a `content` record.
///
/// Blocks that omit `content_type` are answer text; reasoning blocks carry
/// `content_type: "thinking"` and put their fragment in `thinking`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireContentBlock {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl WireContentBlock {
    pub fn text(fragment: impl Into<String>) -> Self {
        Self {
            content_type: TEXT_CONTENT_TYPE.to_string(),
            text: fragment.into(),
            thinking: None,
        }
    }

    pub fn thinking(fragment: impl Into<String>) -> Self {
        Self {
            content_type: THINKING_CONTENT_TYPE.to_string(),
            text: String::new(),
            thinking: Some(fragment.into()),
        }
    }

    /// Returns true when this block belongs to the reasoning channel.
    pub fn is_thinking(&self) -> bool {
        self.content_type == THINKING_CONTENT_TYPE || self.thinking.is_some()
    }
}

/// Usage envelope as the upstream reports it. Cost strings stay server-side;
/// only the token counters matter to the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub total_cost: Option<String>,
    #[serde(default)]
    pub anthropic_usage: WireProviderUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireProviderUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Token counters surfaced to the rest of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn from_wire(usage: &WireUsage) -> Self {
        Self {
            input_tokens: usage.anthropic_usage.input_tokens,
            output_tokens: usage.anthropic_usage.output_tokens,
            total_tokens: usage.anthropic_usage.total_tokens,
        }
    }
}

/// Body of a non-streaming completion response: the full assistant message
/// as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCompletion {
    pub content: Vec<WireContentBlock>,
    #[serde(default)]
    pub combined_usage: Option<WireUsage>,
}

fn default_content_type() -> String {
    TEXT_CONTENT_TYPE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_record_preserves_block_order_and_channels() {
        let payload = r#"{"type":"content","content":[
            {"content_type":"thinking","thinking":"hm"},
            {"text":"answer"},
            {"content_type":"text","text":" tail"}
        ]}"#;

        let event: WireEvent = serde_json::from_str(payload).expect("valid content record");
        let WireEvent::Content { content } = event else {
            panic!("expected content record");
        };

        assert_eq!(content.len(), 3);
        assert!(content[0].is_thinking());
        assert_eq!(content[0].thinking.as_deref(), Some("hm"));
        assert!(!content[1].is_thinking());
        assert_eq!(content[1].text, "answer");
        assert_eq!(content[2].text, " tail");
    }

    #[test]
    fn blocks_without_content_type_default_to_text() {
        let block: WireContentBlock =
            serde_json::from_str(r#"{"text":"42"}"#).expect("valid block");
        assert_eq!(block.content_type, TEXT_CONTENT_TYPE);
        assert!(!block.is_thinking());
    }

    #[test]
    fn stop_and_done_records_parse_from_bare_tags() {
        assert_eq!(
            serde_json::from_str::<WireEvent>(r#"{"type":"message_stop"}"#).expect("stop"),
            WireEvent::MessageStop
        );
        assert_eq!(
            serde_json::from_str::<WireEvent>(r#"{"type":"done"}"#).expect("done"),
            WireEvent::Done
        );
    }

    #[test]
    fn usage_record_maps_to_token_counters() {
        let payload = r#"{"type":"usage","usage":{
            "total_cost":"$0.004",
            "anthropic_usage":{"input_tokens":12,"output_tokens":34,"total_tokens":46}
        }}"#;

        let event: WireEvent = serde_json::from_str(payload).expect("valid usage record");
        let WireEvent::Usage { usage } = event else {
            panic!("expected usage record");
        };

        let tokens = TokenUsage::from_wire(&usage);
        assert_eq!(tokens.input_tokens, 12);
        assert_eq!(tokens.output_tokens, 34);
        assert_eq!(tokens.total_tokens, 46);
    }
}
