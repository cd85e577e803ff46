use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    content::{Content, ToolUseContent},
    message::{Message, Role},
    usage::Usage,
};

/// Why the model stopped producing output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    ContentFilter,
    #[strum(default)]
    Other(String),
}

impl StopReason {
    /// Maps the finish strings used by the supported vendors.
    #[must_use]
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop" | "STOP" => Self::EndTurn,
            "max_tokens" | "length" | "MAX_TOKENS" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            "tool_use" | "tool_calls" | "function_call" => Self::ToolUse,
            "content_filter" | "SAFETY" | "RECITATION" | "refusal" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A complete assistant turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub role: Role,
    pub content: Vec<Content>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl Response {
    /// Concatenated text of all text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.iter().filter_map(Content::as_text).collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolUseContent> {
        self.content.iter().filter_map(Content::as_tool_use)
    }

    /// The response as an assistant message, ready to append to a conversation.
    #[must_use]
    pub fn to_message(&self) -> Message {
        Message {
            role: Role::Assistant,
            content: self.content.clone(),
        }
    }
}
