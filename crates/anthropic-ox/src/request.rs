use llm_ox::{
    GenerateOptions, Message, Role, ToolChoice, ToolDefinition,
    content::{Content, MediaSource, ToolResultPayload},
};
use serde::Serialize;
use serde_json::Value;

/// Body of `POST /v1/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<WireToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: Vec<WireContent>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContent {
    Text {
        text: String,
    },
    Image {
        source: WireSource,
    },
    Document {
        source: WireSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: WireToolResult,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum WireToolResult {
    Text(String),
    Blocks(Vec<WireContent>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
    File { file_id: String },
}

impl From<&MediaSource> for WireSource {
    fn from(source: &MediaSource) -> Self {
        match source {
            MediaSource::Base64 { media_type, data } => Self::Base64 {
                media_type: media_type.clone(),
                data: data.clone(),
            },
            MediaSource::Url { url, .. } => Self::Url { url: url.clone() },
            MediaSource::File { file_id, .. } => Self::File {
                file_id: file_id.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireTool {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub input_schema: Value,
}

impl From<&ToolDefinition> for WireTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireToolChoice {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_parallel_tool_use: Option<bool>,
}

fn encode_tool_choice(
    choice: Option<&ToolChoice>,
    parallel_tool_calls: Option<bool>,
) -> Option<WireToolChoice> {
    let disable_parallel_tool_use = parallel_tool_calls.map(|p| !p);
    let (kind, name) = match choice {
        Some(ToolChoice::Auto) => ("auto", None),
        Some(ToolChoice::Any) => ("any", None),
        Some(ToolChoice::None) => ("none", None),
        Some(ToolChoice::Tool { name }) => ("tool", Some(name.clone())),
        None if disable_parallel_tool_use.is_some() => ("auto", None),
        None => return None,
    };
    Some(WireToolChoice {
        kind,
        name,
        // `none` takes no parallelism flag.
        disable_parallel_tool_use: disable_parallel_tool_use.filter(|_| kind != "none"),
    })
}

fn encode_content(content: &Content) -> Option<WireContent> {
    Some(match content {
        Content::Text(t) => WireContent::Text {
            text: t.text.clone(),
        },
        Content::Image(image) => WireContent::Image {
            source: (&image.source).into(),
        },
        Content::Document(doc) => WireContent::Document {
            source: (&doc.source).into(),
            title: doc.title.clone(),
        },
        Content::ToolUse(call) => WireContent::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        },
        Content::ToolResult(result) => WireContent::ToolResult {
            tool_use_id: result.tool_use_id.clone(),
            content: match &result.content {
                ToolResultPayload::Text(text) => WireToolResult::Text(text.clone()),
                ToolResultPayload::Parts(parts) => {
                    WireToolResult::Blocks(parts.iter().filter_map(encode_content).collect())
                }
            },
            is_error: result.is_error,
        },
        // Unsigned thinking cannot be replayed.
        Content::Thinking(thinking) => WireContent::Thinking {
            thinking: thinking.thinking.clone(),
            signature: thinking.signature.clone()?,
        },
    })
}

fn encode_message(message: &Message) -> Option<WireMessage> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => return None,
    };
    Some(WireMessage {
        role,
        content: message.content.iter().filter_map(encode_content).collect(),
    })
}

/// The system prompt plus any system-role messages, which the Messages API
/// only accepts at the top level.
fn system_text(options: &GenerateOptions) -> Option<String> {
    let parts: Vec<String> = options
        .system_prompt
        .iter()
        .cloned()
        .chain(
            options
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(Message::text),
        )
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

impl MessagesRequest {
    pub(crate) fn from_options(
        options: &GenerateOptions,
        model: &str,
        max_tokens: u32,
        stream: bool,
    ) -> Self {
        let mut messages: Vec<WireMessage> =
            options.messages.iter().filter_map(encode_message).collect();
        if let Some(prefill) = options.prefill() {
            messages.push(WireMessage {
                role: "assistant",
                content: vec![WireContent::Text {
                    text: prefill.to_string(),
                }],
            });
        }

        Self {
            model: options.model_or(model).to_string(),
            messages,
            max_tokens: options.max_tokens.unwrap_or(max_tokens),
            system: system_text(options),
            temperature: options.temperature,
            tools: options.tools.iter().map(WireTool::from).collect(),
            tool_choice: encode_tool_choice(options.tool_choice.as_ref(), options.parallel_tool_calls),
            stream: stream.then_some(true),
        }
    }
}
