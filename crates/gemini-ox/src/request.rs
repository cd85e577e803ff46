use std::collections::HashMap;

use llm_ox::{
    GenerateOptions, Message, Role, ToolChoice, ToolDefinition,
    content::{Content, MediaSource},
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::content::{Blob, FileData, FunctionCall, FunctionResponse, Part, WireContent};

/// Body of `generateContent` and `streamGenerateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<WireContent>,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDefinition> for FunctionDeclaration {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_function_names: Vec<String>,
}

fn encode_tool_choice(choice: &ToolChoice) -> ToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Auto => ("AUTO", Vec::new()),
        ToolChoice::Any => ("ANY", Vec::new()),
        ToolChoice::None => ("NONE", Vec::new()),
        ToolChoice::Tool { name } => ("ANY", vec![name.clone()]),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode,
            allowed_function_names,
        },
    }
}

fn encode_media(source: &MediaSource) -> Part {
    match source {
        MediaSource::Base64 { media_type, data } => Part {
            inline_data: Some(Blob {
                mime_type: media_type.clone(),
                data: data.clone(),
            }),
            ..Part::default()
        },
        MediaSource::Url { url, media_type } => Part {
            file_data: Some(FileData {
                mime_type: media_type.clone(),
                file_uri: url.clone(),
            }),
            ..Part::default()
        },
        MediaSource::File {
            file_id,
            media_type,
        } => Part {
            file_data: Some(FileData {
                mime_type: media_type.clone(),
                file_uri: file_id.clone(),
            }),
            ..Part::default()
        },
    }
}

/// Function responses are matched by name, which only the earlier call carries.
fn tool_names(messages: &[Message]) -> HashMap<&str, &str> {
    messages
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(Content::as_tool_use)
        .map(|call| (call.id.as_str(), call.name.as_str()))
        .collect()
}

fn encode_part(content: &Content, names: &HashMap<&str, &str>) -> Option<Part> {
    Some(match content {
        Content::Text(t) => Part::text(t.text.clone()),
        Content::Image(image) => encode_media(&image.source),
        Content::Document(doc) => encode_media(&doc.source),
        Content::ToolUse(call) => Part {
            function_call: Some(FunctionCall {
                id: Some(call.id.clone()),
                name: call.name.clone(),
                args: Some(call.input.clone()),
            }),
            ..Part::default()
        },
        Content::ToolResult(result) => {
            let mut response = json!({"result": result.content.to_text()});
            if result.is_error {
                response["is_error"] = Value::Bool(true);
            }
            Part {
                function_response: Some(FunctionResponse {
                    id: Some(result.tool_use_id.clone()),
                    name: names
                        .get(result.tool_use_id.as_str())
                        .map_or_else(|| result.tool_use_id.clone(), |n| (*n).to_string()),
                    response,
                }),
                ..Part::default()
            }
        }
        // Only signed thoughts are worth replaying.
        Content::Thinking(thinking) => Part {
            text: Some(thinking.thinking.clone()),
            thought: Some(true),
            thought_signature: Some(thinking.signature.clone()?),
            ..Part::default()
        },
    })
}

fn system_instruction(options: &GenerateOptions) -> Option<WireContent> {
    let parts: Vec<Part> = options
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
        .map(Part::text)
        .collect();
    (!parts.is_empty()).then(|| WireContent::new(None, parts))
}

impl GenerateContentRequest {
    pub(crate) fn from_options(options: &GenerateOptions, max_tokens: u32) -> Self {
        let names = tool_names(&options.messages);
        let mut contents: Vec<WireContent> = options
            .messages
            .iter()
            .filter_map(|message| {
                let role = match message.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => return None,
                };
                let parts = message
                    .content
                    .iter()
                    .filter_map(|c| encode_part(c, &names))
                    .collect();
                Some(WireContent::new(Some(role), parts))
            })
            .collect();
        if let Some(prefill) = options.prefill() {
            contents.push(WireContent::new(Some("model"), vec![Part::text(prefill)]));
        }

        let tools = if options.tools.is_empty() {
            Vec::new()
        } else {
            vec![WireTool {
                function_declarations: options.tools.iter().map(FunctionDeclaration::from).collect(),
            }]
        };

        Self {
            contents,
            system_instruction: system_instruction(options),
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: Some(options.max_tokens.unwrap_or(max_tokens)),
            },
            tools,
            tool_config: options.tool_choice.as_ref().map(encode_tool_choice),
        }
    }
}
