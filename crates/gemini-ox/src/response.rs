use llm_ox::{
    Content, RequestError, Response, Role, StopReason, Usage, content::ThinkingContent,
};
use serde::Deserialize;

use crate::content::{Part, WireContent};

/// One `generateContent` answer, or one frame of a streamed answer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub usage_metadata: Option<UsageMetadata>,
    pub model_version: Option<String>,
    pub response_id: Option<String>,
    /// In-band failure on a streamed answer.
    pub error: Option<StatusError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<WireContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusError {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub thoughts_token_count: u64,
    #[serde(default)]
    pub cached_content_token_count: u64,
}

impl From<UsageMetadata> for Usage {
    /// Thought tokens are billed as output.
    fn from(usage: UsageMetadata) -> Self {
        Self {
            cache_read_input_tokens: usage.cached_content_token_count,
            ..Usage::new(
                usage.prompt_token_count,
                usage.candidates_token_count + usage.thoughts_token_count,
            )
        }
    }
}

/// Gemini reports `STOP` even when the turn ends in function calls.
pub(crate) fn stop_reason(finish_reason: &str, called_tools: bool) -> StopReason {
    match StopReason::from_vendor(finish_reason) {
        StopReason::EndTurn if called_tools => StopReason::ToolUse,
        reason => reason,
    }
}

fn push_part(content: &mut Vec<Content>, part: Part) {
    if let Some(call) = &part.function_call {
        content.push(Content::tool_use(call.call_id(), call.name.clone(), call.input()));
        return;
    }
    let thought = part.is_thought();
    let Some(text) = part.text.filter(|t| !t.is_empty()) else {
        return;
    };
    // Adjacent parts of the same kind form one block.
    match (content.last_mut(), thought) {
        (Some(Content::Text(block)), false) => block.text.push_str(&text),
        (Some(Content::Thinking(block)), true) => {
            block.thinking.push_str(&text);
            if part.thought_signature.is_some() {
                block.signature = part.thought_signature;
            }
        }
        (_, false) => content.push(Content::text(text)),
        (_, true) => content.push(Content::Thinking(ThinkingContent {
            thinking: text,
            signature: part.thought_signature,
        })),
    }
}

impl GenerateContentResponse {
    /// Maps the first candidate to a canonical [`Response`].
    ///
    /// # Errors
    ///
    /// `EmptyResponse` when there is no candidate, as with a blocked prompt.
    pub fn into_response(self) -> Result<Response, RequestError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(RequestError::EmptyResponse)?;

        let mut content = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            push_part(&mut content, part);
        }
        let called_tools = content.iter().any(|c| c.as_tool_use().is_some());

        Ok(Response {
            id: self.response_id.unwrap_or_default(),
            model: self.model_version.unwrap_or_default(),
            role: Role::Assistant,
            content,
            usage: self.usage_metadata.map(Usage::from).unwrap_or_default(),
            stop_reason: candidate
                .finish_reason
                .map(|r| stop_reason(&r, called_tools)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn parts_are_merged_and_calls_get_ids() {
        let response = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "plan", "thought": true},
                    {"text": " more", "thought": true, "thoughtSignature": "c2ln"},
                    {"text": "The weather "},
                    {"text": "is:"},
                    {"functionCall": {"name": "weather", "args": {"city": "Oslo"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "thoughtsTokenCount": 7},
            "modelVersion": "gemini-2.5-flash",
            "responseId": "resp-1"
        }))
        .into_response()
        .unwrap();

        assert_eq!(
            response.content[0],
            Content::Thinking(ThinkingContent {
                thinking: "plan more".into(),
                signature: Some("c2ln".into()),
            })
        );
        assert_eq!(response.text(), "The weather is:");
        let call = response.tool_calls().next().unwrap();
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.input, json!({"city": "Oslo"}));
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.output_tokens, 12);
        assert_eq!(response.id, "resp-1");
        assert_eq!(response.model, "gemini-2.5-flash");
    }

    #[test]
    fn blocked_prompt_has_no_candidates() {
        let err = parse(json!({"promptFeedback": {"blockReason": "SAFETY"}}))
            .into_response()
            .unwrap_err();
        assert!(matches!(err, RequestError::EmptyResponse));
    }

    #[test]
    fn finish_reasons() {
        assert_eq!(stop_reason("MAX_TOKENS", false), StopReason::MaxTokens);
        assert_eq!(stop_reason("SAFETY", true), StopReason::ContentFilter);
        assert_eq!(stop_reason("STOP", false), StopReason::EndTurn);
    }
}
