use llm_ox::{ChunkDecoder, ContentBlock, RequestError, StopReason, StreamState, Usage};
use serde::Deserialize;
use tracing::debug;

use crate::response::WireUsage;

/// One Messages streaming event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamErrorBody,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamErrorBody {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

/// Maps Messages events onto the shared engine.
///
/// The vendor already numbers its blocks, so indices pass through as is.
/// Only `message_stop` completes the stream: a body that ends without it
/// is reported as incomplete.
#[derive(Debug, Default)]
pub struct MessageEventDecoder;

impl ChunkDecoder for MessageEventDecoder {
    type Chunk = MessageEvent;

    fn decode(&mut self, event: MessageEvent, state: &mut StreamState) -> Result<(), RequestError> {
        match event {
            MessageEvent::MessageStart { message } => {
                state.set_id(&message.id);
                state.set_model(&message.model);
                if let Some(usage) = message.usage {
                    state.merge_usage(&Usage::from(usage));
                }
                state.start_message();
            }
            MessageEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                StartBlock::Text { text } => {
                    state.start_block(index, ContentBlock::Text);
                    state.text(index, &text);
                }
                StartBlock::Thinking { thinking } => {
                    state.start_block(index, ContentBlock::Thinking);
                    state.thinking(index, &thinking);
                }
                StartBlock::ToolUse { id, name } => state.tool_start(index, id, name),
                StartBlock::Unsupported => debug!(index, "ignoring unsupported content block"),
            },
            MessageEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => state.text(index, &text),
                BlockDelta::InputJsonDelta { partial_json } => state.tool_args(index, &partial_json),
                BlockDelta::ThinkingDelta { thinking } => state.thinking(index, &thinking),
                BlockDelta::SignatureDelta { signature } => state.signature(index, &signature),
                BlockDelta::Unsupported => debug!(index, "ignoring unsupported delta"),
            },
            MessageEvent::ContentBlockStop { index } => state.stop(index),
            MessageEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    state.set_stop_reason(StopReason::from_vendor(&reason));
                }
                if let Some(usage) = usage {
                    state.merge_usage(&Usage::from(usage));
                }
            }
            MessageEvent::MessageStop => state.complete(),
            MessageEvent::Ping => {}
            MessageEvent::Error { error } => {
                return Err(RequestError::Stream {
                    error_type: error.kind,
                    message: error.message,
                });
            }
        }
        Ok(())
    }

    fn end_of_stream(&mut self, state: &mut StreamState) {
        if !state.is_completed() {
            debug!("body ended before message_stop");
        }
    }
}
