use bon::Builder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    content::Content,
    error::RequestError,
    hooks::Hooks,
    message::Message,
};

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
pub struct ToolDefinition {
    #[builder(into)]
    pub name: String,
    #[builder(default, into)]
    pub description: String,
    /// JSON Schema of the tool input object.
    #[builder(default = serde_json::json!({"type": "object", "properties": {}}))]
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Derives the input schema from a Rust type.
    pub fn from_schema<T: JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
        }
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: schema,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    /// The model must call some tool.
    Any,
    None,
    Tool { name: String },
}

/// Canonical options for one `generate` or `stream` call.
#[derive(Debug, Clone, Default, Builder)]
pub struct GenerateOptions {
    #[builder(default, into)]
    pub messages: Vec<Message>,
    /// Overrides the provider's default model.
    #[builder(into)]
    pub model: Option<String>,
    #[builder(into)]
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[builder(default)]
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    /// Text the assistant turn is seeded with.
    #[builder(into)]
    pub prefill: Option<String>,
    /// When set, non-streaming prefill is only applied to text containing it.
    #[builder(into)]
    pub prefill_closing_tag: Option<String>,
    #[builder(default)]
    pub request_headers: Vec<(String, String)>,
    /// Merged into the top level of the vendor body, overriding same-named keys.
    #[builder(default)]
    pub provider_options: Map<String, Value>,
    #[builder(default)]
    pub hooks: Hooks,
}

impl GenerateOptions {
    /// # Errors
    ///
    /// `InvalidRequest` when there are no messages or one of them is empty.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.messages.is_empty() {
            return Err(RequestError::InvalidRequest(
                "at least one message is required".into(),
            ));
        }
        if let Some(i) = self.messages.iter().position(|m| m.content.is_empty()) {
            return Err(RequestError::InvalidRequest(format!(
                "message {i} has no content"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }

    #[must_use]
    pub fn prefill(&self) -> Option<&str> {
        self.prefill.as_deref().filter(|p| !p.is_empty())
    }

    /// Prefill as the trailing assistant message vendors continue from.
    #[must_use]
    pub fn prefill_message(&self) -> Option<Message> {
        self.prefill().map(|p| Message::assistant([p]))
    }
}

/// Merges passthrough options into an encoded vendor body.
pub fn merge_provider_options(body: &mut Value, options: &Map<String, Value>) {
    if let Some(obj) = body.as_object_mut() {
        for (key, value) in options {
            obj.insert(key.clone(), value.clone());
        }
    }
}

/// Prepends the prefill to the first text block of a complete response.
///
/// With a closing tag, the block must contain it; otherwise nothing
/// changes. Returns whether the prefill was applied.
pub fn apply_prefill(content: &mut [Content], prefill: &str, closing_tag: Option<&str>) -> bool {
    if prefill.is_empty() {
        return false;
    }
    let Some(Content::Text(block)) = content.iter_mut().find(|c| matches!(c, Content::Text(_)))
    else {
        return false;
    };
    if block.text.starts_with(prefill) {
        return false;
    }
    match closing_tag.filter(|t| !t.is_empty()) {
        Some(tag) if !block.text.contains(tag) => false,
        _ => {
            block.text.insert_str(0, prefill);
            true
        }
    }
}
