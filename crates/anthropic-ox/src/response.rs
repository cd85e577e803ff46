use llm_ox::{
    Content, RequestError, Response, Role, StopReason, Usage, content::ThinkingContent,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WireUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens.unwrap_or_default(),
            output_tokens: usage.output_tokens.unwrap_or_default(),
            cache_creation_input_tokens: usage.cache_creation_input_tokens.unwrap_or_default(),
            cache_read_input_tokens: usage.cache_read_input_tokens.unwrap_or_default(),
        }
    }
}

/// A content block of a complete message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// `redacted_thinking`, server tool results and anything newer.
    #[serde(other)]
    Unsupported,
}

impl WireBlock {
    fn into_content(self) -> Option<Content> {
        match self {
            Self::Text { text } => Some(Content::text(text)),
            Self::Thinking {
                thinking,
                signature,
            } => Some(Content::Thinking(ThinkingContent {
                thinking,
                signature,
            })),
            Self::ToolUse { id, name, input } => {
                let input = if input.is_null() {
                    Value::Object(serde_json::Map::new())
                } else {
                    input
                };
                Some(Content::tool_use(id, name, input))
            }
            Self::Unsupported => None,
        }
    }
}

/// Non-streaming Messages answer.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<WireBlock>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: WireUsage,
}

impl MessagesResponse {
    /// # Errors
    ///
    /// `EmptyResponse` when the message has no content blocks.
    pub fn into_response(self) -> Result<Response, RequestError> {
        if self.content.is_empty() {
            return Err(RequestError::EmptyResponse);
        }
        Ok(Response {
            id: self.id,
            model: self.model,
            role: Role::Assistant,
            content: self
                .content
                .into_iter()
                .filter_map(WireBlock::into_content)
                .collect(),
            usage: self.usage.into(),
            stop_reason: self.stop_reason.map(|r| StopReason::from_vendor(&r)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blocks_usage_and_stop_reason() {
        let message: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "redacted_thinking", "data": "opaque"},
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Oslo"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 9, "cache_read_input_tokens": 12}
        }))
        .unwrap();

        let response = message.into_response().unwrap();
        assert_eq!(response.content.len(), 3);
        assert_eq!(response.text(), "Let me check.");
        assert_eq!(response.tool_calls().next().unwrap().input, json!({"city": "Oslo"}));
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.cache_read_input_tokens, 12);
        assert_eq!(response.usage.cache_creation_input_tokens, 0);
    }

    #[test]
    fn no_content_is_an_error() {
        let message: MessagesResponse =
            serde_json::from_value(json!({"id": "msg_2", "content": [], "stop_reason": "end_turn"}))
                .unwrap();
        assert!(matches!(
            message.into_response(),
            Err(RequestError::EmptyResponse)
        ));
    }
}
