//! Raw message shapes emitted by the harness.
//!
//! The wire format is loosely typed: every line carries a `type` string and a
//! different set of mostly optional fields. Each known `type` maps to one
//! variant; anything else deserialises to [`StreamMessage::Unknown`] and is
//! ignored.

use serde::Deserialize;

/// One line of harness output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Session metadata.
    System(SystemMessage),
    /// Assistant turn content: text and tool invocations.
    Assistant(ConversationMessage),
    /// User-role content: tool results.
    User(ConversationMessage),
    /// End of the assistant's turn.
    Result(ResultMessage),
    /// Any other `type` value.
    #[serde(other)]
    Unknown,
}

impl StreamMessage {
    /// Parse a single line, returning `None` for blank or malformed input.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str(trimmed) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring unparseable stream line");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationMessage {
    #[serde(default)]
    pub message: MessageBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content is either a bare string or a list of blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Tool result payload: a string or a list of `{type, text}` blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl ToolResultContent {
    /// Flatten the payload to plain text.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default, alias = "cost_usd")]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_system_message() {
        let msg = StreamMessage::parse(
            r#"{"type":"system","subtype":"init","session_id":"sess-1","model":"opus"}"#,
        );
        match msg {
            Some(StreamMessage::System(sys)) => {
                assert_eq!(sys.session_id.as_deref(), Some("sess-1"));
                assert_eq!(sys.subtype.as_deref(), Some("init"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_assistant_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"text","text":"hi"},
            {"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"a.rs"}},
            {"type":"image","source":{}}
        ]}}"#
            .replace('\n', "");
        let Some(StreamMessage::Assistant(msg)) = StreamMessage::parse(&line) else {
            panic!("expected assistant message");
        };
        let MessageContent::Blocks(blocks) = msg.message.content else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[1], ContentBlock::ToolUse { .. }));
        assert!(matches!(blocks[2], ContentBlock::Other));
    }

    #[test]
    fn test_unknown_type_is_ignorable() {
        let msg = StreamMessage::parse(r#"{"type":"stream_event","event":{}}"#);
        assert!(matches!(msg, Some(StreamMessage::Unknown)));
    }

    #[test]
    fn test_malformed_and_blank_lines() {
        assert!(StreamMessage::parse("").is_none());
        assert!(StreamMessage::parse("   ").is_none());
        assert!(StreamMessage::parse("{not json").is_none());
        assert!(StreamMessage::parse(r#"{"no_type":1}"#).is_none());
    }

    #[test]
    fn test_result_cost_alias() {
        let Some(StreamMessage::Result(res)) =
            StreamMessage::parse(r#"{"type":"result","is_error":false,"cost_usd":0.5}"#)
        else {
            panic!("expected result");
        };
        assert_eq!(res.total_cost_usd, Some(0.5));
        assert!(res.usage.is_none());
    }

    #[test]
    fn test_tool_result_block_content_flattens() {
        let content = ToolResultContent::Blocks(vec![
            serde_json::json!({"type": "text", "text": "line one"}),
            serde_json::json!({"type": "image"}),
            serde_json::json!({"type": "text", "text": "line two"}),
        ]);
        assert_eq!(content.to_text(), "line one\nline two");
    }
}
