use base64::Engine;
use serde::{Deserialize, Serialize};

/// One block of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
    Document(DocumentContent),
    ToolUse(ToolUseContent),
    ToolResult(ToolResultContent),
    Thinking(ThinkingContent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextContent {
    pub text: String,
}

/// Where the bytes of an image or document live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    Base64 { media_type: String, data: String },
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl MediaSource {
    /// Base64-encodes raw bytes.
    pub fn from_bytes(media_type: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        Self::Base64 {
            media_type: media_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            media_type: None,
        }
    }

    #[must_use]
    pub fn media_type(&self) -> Option<&str> {
        match self {
            Self::Base64 { media_type, .. } => Some(media_type),
            Self::Url { media_type, .. } | Self::File { media_type, .. } => media_type.as_deref(),
        }
    }

    /// `data:` URL form, as OpenAI-style vendors expect inline images.
    #[must_use]
    pub fn to_data_url(&self) -> Option<String> {
        match self {
            Self::Base64 { media_type, data } => Some(format!("data:{media_type};base64,{data}")),
            Self::Url { url, .. } => Some(url.clone()),
            Self::File { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageContent {
    pub source: MediaSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentContent {
    pub source: MediaSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseContent {
    pub id: String,
    pub name: String,
    /// Arguments exactly as the model produced them.
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolResultPayload {
    Text(String),
    Parts(Vec<Content>),
}

impl ToolResultPayload {
    /// Flattens the payload to plain text for vendors that only accept strings.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultContent {
    pub tool_use_id: String,
    pub content: ToolResultPayload,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThinkingContent {
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent { text: text.into() })
    }

    #[must_use]
    pub fn image(source: MediaSource) -> Self {
        Self::Image(ImageContent { source })
    }

    #[must_use]
    pub fn document(source: MediaSource) -> Self {
        Self::Document(DocumentContent {
            source,
            title: None,
        })
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse(ToolUseContent {
            id: id.into(),
            name: name.into(),
            input,
        })
    }

    pub fn tool_result(tool_use_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolResult(ToolResultContent {
            tool_use_id: tool_use_id.into(),
            content: ToolResultPayload::Text(output.into()),
            is_error: false,
        })
    }

    pub fn tool_error(tool_use_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolResult(ToolResultContent {
            tool_use_id: tool_use_id.into(),
            content: ToolResultPayload::Text(output.into()),
            is_error: true,
        })
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking(ThinkingContent {
            thinking: thinking.into(),
            signature: None,
        })
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Self::Text(v) = self {
            Some(&v.text)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_tool_use(&self) -> Option<&ToolUseContent> {
        if let Self::ToolUse(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// `true` for a text block with nothing in it.
    #[must_use]
    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Text(t) if t.text.is_empty())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_builds_data_url() {
        let source = MediaSource::from_bytes("image/png", [0x89, b'P', b'N', b'G']);
        assert_eq!(source.media_type(), Some("image/png"));
        assert_eq!(
            source.to_data_url().as_deref(),
            Some("data:image/png;base64,iVBORw==")
        );
    }

    #[test]
    fn tool_result_parts_flatten_to_text() {
        let payload = ToolResultPayload::Parts(vec![
            Content::text("line one"),
            Content::image(MediaSource::url("https://example.com/a.png")),
            Content::text("line two"),
        ]);
        assert_eq!(payload.to_text(), "line one\nline two");
    }

    #[test]
    fn content_is_tagged_by_type() {
        let json = serde_json::to_value(Content::tool_use(
            "call_1",
            "lookup",
            serde_json::json!({"q": "rust"}),
        ))
        .unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["input"]["q"], "rust");
    }
}
