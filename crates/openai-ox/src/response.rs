use llm_ox::{
    AccumulateError, Content, RequestError, Response, Role, StopReason, Usage,
};
use serde::Deserialize;
use serde_json::Value;

/// Non-streaming Chat Completions answer.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    /// Reasoning text, as sent by OpenRouter-style gateways.
    pub reasoning: Option<String>,
    /// Reasoning text, as sent by DeepSeek-style servers.
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<WireToolCall>>,
}

impl AssistantMessage {
    pub(crate) fn reasoning_text(&self) -> Option<&str> {
        self.reasoning
            .as_deref()
            .or(self.reasoning_content.as_deref())
            .filter(|r| !r.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Self {
            cache_read_input_tokens: usage
                .prompt_tokens_details
                .map_or(0, |d| d.cached_tokens),
            ..Usage::new(usage.prompt_tokens, usage.completion_tokens)
        }
    }
}

/// Tool arguments arrive as a JSON string; empty means no arguments.
fn parse_arguments(index: usize, arguments: &str) -> Result<Value, AccumulateError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments)
        .map_err(|source| AccumulateError::MalformedToolInput { index, source })
}

impl ChatCompletion {
    /// Maps the first choice to a canonical [`Response`].
    ///
    /// # Errors
    ///
    /// `EmptyResponse` without choices; `Accumulate` when a tool call
    /// carries arguments that are not JSON.
    pub fn into_response(self) -> Result<Response, RequestError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or(RequestError::EmptyResponse)?;
        let message = choice.message;

        let mut content = Vec::new();
        if let Some(reasoning) = message.reasoning_text() {
            content.push(Content::thinking(reasoning));
        }
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            content.push(Content::text(text));
        }
        for call in message.tool_calls.unwrap_or_default() {
            let input = parse_arguments(content.len(), &call.function.arguments)?;
            content.push(Content::tool_use(call.id, call.function.name, input));
        }

        Ok(Response {
            id: self.id,
            model: self.model,
            role: Role::Assistant,
            content,
            usage: self.usage.map(Usage::from).unwrap_or_default(),
            stop_reason: choice
                .finish_reason
                .filter(|r| !r.is_empty())
                .map(|r| StopReason::from_vendor(&r)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(body: Value) -> ChatCompletion {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn text_tool_calls_and_usage_are_mapped() {
        let response = completion(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Checking.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "weather", "arguments": "{\"city\":\"Oslo\"}"}
                    }, {
                        "id": "call_2",
                        "type": "function",
                        "function": {"name": "now", "arguments": ""}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 8,
                "prompt_tokens_details": {"cached_tokens": 4}
            }
        }))
        .into_response()
        .unwrap();

        assert_eq!(response.text(), "Checking.");
        let calls: Vec<_> = response.tool_calls().collect();
        assert_eq!(calls[0].input, json!({"city": "Oslo"}));
        assert_eq!(calls[1].input, json!({}));
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.cache_read_input_tokens, 4);
    }

    #[test]
    fn null_content_and_reasoning() {
        let response = completion(json!({
            "choices": [{
                "message": {"content": null, "reasoning_content": "hmm", "tool_calls": null},
                "finish_reason": "stop"
            }]
        }))
        .into_response()
        .unwrap();
        assert_eq!(response.content, vec![Content::thinking("hmm")]);
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = completion(json!({"id": "x", "choices": []}))
            .into_response()
            .unwrap_err();
        assert!(matches!(err, RequestError::EmptyResponse));
    }

    #[test]
    fn malformed_arguments_are_reported() {
        let err = completion(json!({
            "choices": [{
                "message": {"tool_calls": [{"id": "c", "function": {"name": "f", "arguments": "{\"a\":"}}]},
                "finish_reason": "tool_calls"
            }]
        }))
        .into_response()
        .unwrap_err();
        assert!(matches!(
            err,
            RequestError::Accumulate(AccumulateError::MalformedToolInput { index: 0, .. })
        ));
    }
}
