use llm_ox::{
    GenerateOptions, Message, RequestError, Role, ToolChoice, ToolDefinition,
    content::{Content, MediaSource},
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Chat Completions request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Reasoning models reject `max_tokens` and take this instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(text.into())),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FileRef },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the API expects a string here.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDefinition> for Tool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: FunctionDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }
}

pub(crate) fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::from("auto"),
        ToolChoice::Any => Value::from("required"),
        ToolChoice::None => Value::from("none"),
        ToolChoice::Tool { name } => serde_json::json!({
            "type": "function",
            "function": {"name": name},
        }),
    }
}

/// Client-level settings that shape the request body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    pub system_role: &'a str,
    pub include_stream_usage: bool,
}

/// `o1`, `o3`, `gpt-5` and friends only accept `max_completion_tokens`.
fn uses_completion_tokens(model: &str) -> bool {
    let model = model.rsplit('/').next().unwrap_or(model);
    model.starts_with("gpt-5")
        || (model.starts_with('o') && model[1..].starts_with(|c: char| c.is_ascii_digit()))
}

impl ChatRequest {
    /// # Errors
    ///
    /// `InvalidRequest` when a message holds media the endpoint cannot take.
    pub(crate) fn from_options(
        options: &GenerateOptions,
        settings: Settings<'_>,
        stream: bool,
    ) -> Result<Self, RequestError> {
        let model = options.model_or(settings.model).to_string();
        let max_tokens = options.max_tokens.unwrap_or(settings.max_tokens);
        let (max_tokens, max_completion_tokens) = if uses_completion_tokens(&model) {
            (None, Some(max_tokens))
        } else {
            (Some(max_tokens), None)
        };

        Ok(Self {
            messages: encode_messages(options, settings.system_role)?,
            model,
            temperature: options.temperature,
            max_tokens,
            max_completion_tokens,
            tools: options.tools.iter().map(Tool::from).collect(),
            tool_choice: options.tool_choice.as_ref().map(encode_tool_choice),
            parallel_tool_calls: options.parallel_tool_calls,
            stream: stream.then_some(true),
            stream_options: (stream && settings.include_stream_usage)
                .then_some(StreamOptions { include_usage: true }),
        })
    }
}

pub(crate) fn encode_messages(
    options: &GenerateOptions,
    system_role: &str,
) -> Result<Vec<ChatMessage>, RequestError> {
    let mut out = Vec::with_capacity(options.messages.len() + 2);

    if let Some(system) = options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        out.push(ChatMessage::text(system_role, system));
    }

    for message in &options.messages {
        encode_message(message, system_role, &mut out)?;
    }

    if let Some(prefill) = options.prefill() {
        out.push(ChatMessage::text("assistant", prefill));
    }

    Ok(out)
}

fn encode_message(
    message: &Message,
    system_role: &str,
    out: &mut Vec<ChatMessage>,
) -> Result<(), RequestError> {
    match message.role {
        Role::System => out.push(ChatMessage::text(system_role, message.text())),
        Role::Assistant => out.push(encode_assistant(&message.content)),
        Role::User => {
            let mut parts = Vec::new();
            for content in &message.content {
                match content {
                    // Tool results travel as their own `tool` messages.
                    Content::ToolResult(result) => out.push(ChatMessage {
                        role: "tool".into(),
                        content: Some(MessageContent::Text(result.content.to_text())),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(result.tool_use_id.clone()),
                    }),
                    other => parts.extend(encode_part(other)?),
                }
            }
            if !parts.is_empty() {
                out.push(ChatMessage {
                    role: "user".into(),
                    content: Some(collapse(parts)),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                });
            }
        }
    }
    Ok(())
}

fn encode_assistant(content: &[Content]) -> ChatMessage {
    if content.iter().any(|c| matches!(c, Content::Thinking(_))) {
        debug!("reasoning blocks are not replayed to chat completions");
    }
    let text: String = content.iter().filter_map(Content::as_text).collect();
    let tool_calls: Vec<ToolCall> = content
        .iter()
        .filter_map(Content::as_tool_use)
        .map(|call| ToolCall {
            id: call.id.clone(),
            kind: "function",
            function: FunctionCall {
                name: call.name.clone(),
                arguments: call.input.to_string(),
            },
        })
        .collect();

    ChatMessage {
        role: "assistant".into(),
        content: (!text.is_empty()).then_some(MessageContent::Text(text)),
        tool_calls,
        tool_call_id: None,
    }
}

fn encode_part(content: &Content) -> Result<Option<ContentPart>, RequestError> {
    Ok(match content {
        Content::Text(t) => Some(ContentPart::Text {
            text: t.text.clone(),
        }),
        Content::Image(image) => {
            let url = image.source.to_data_url().ok_or_else(|| {
                RequestError::InvalidRequest(
                    "images must be inline data or a URL for chat completions".to_string(),
                )
            })?;
            Some(ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            })
        }
        Content::Document(doc) => Some(ContentPart::File {
            file: match &doc.source {
                MediaSource::File { file_id, .. } => FileRef {
                    file_id: Some(file_id.clone()),
                    file_data: None,
                    filename: doc.title.clone(),
                },
                source => FileRef {
                    file_id: None,
                    file_data: source.to_data_url(),
                    filename: doc.title.clone(),
                },
            },
        }),
        Content::ToolUse(_) | Content::ToolResult(_) | Content::Thinking(_) => {
            debug!("skipping content a user turn cannot carry");
            None
        }
    })
}

/// A lone text part is sent as a plain string.
fn collapse(parts: Vec<ContentPart>) -> MessageContent {
    match <[ContentPart; 1]>::try_from(parts) {
        Ok([ContentPart::Text { text }]) => MessageContent::Text(text),
        Ok([part]) => MessageContent::Parts(vec![part]),
        Err(parts) => MessageContent::Parts(parts),
    }
}
