//! Wire-independent streaming events.
//!
//! Every decoder produces the same sequence shape: one `MessageStart`,
//! then for each content block a `ContentBlockStart`, any number of
//! `ContentBlockDelta`s and one `ContentBlockStop`, then a `MessageDelta`
//! with the stop reason and a final `MessageStop`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants};

use crate::{
    response::{Response, StopReason},
    usage::Usage,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, EnumDiscriminants)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum_discriminants(name(EventKind), derive(Display, Hash))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
pub enum Event {
    MessageStart {
        id: String,
        model: String,
        #[serde(default)]
        usage: Usage,
    },
    ContentBlockStart {
        index: usize,
        block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(default)]
        usage: Usage,
    },
    MessageStop {
        /// Final ids and usage for vendors that only report them at the end.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Box<Response>>,
    },
}

/// Declares the variant of a block when it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text,
    ToolUse { id: String, name: String },
    Thinking,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    Text { text: String },
    InputJson { partial_json: String },
    Thinking { thinking: String },
    Signature { signature: String },
}

impl Delta {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::InputJson { .. } => "input_json",
            Self::Thinking { .. } => "thinking",
            Self::Signature { .. } => "signature",
        }
    }
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::from(self)
    }

    /// Block index for `ContentBlock*` events.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::ContentBlockStart { index, .. }
            | Self::ContentBlockDelta { index, .. }
            | Self::ContentBlockStop { index } => Some(*index),
            _ => None,
        }
    }

    pub fn text_delta(index: usize, text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index,
            delta: Delta::Text { text: text.into() },
        }
    }

    pub fn json_delta(index: usize, partial_json: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index,
            delta: Delta::InputJson {
                partial_json: partial_json.into(),
            },
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop { .. })
    }
}
