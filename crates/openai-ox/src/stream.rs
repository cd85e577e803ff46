use std::collections::{BTreeMap, HashMap};

use llm_ox::{ChunkDecoder, RequestError, StopReason, StreamState, Usage};
use serde::Deserialize;
use tracing::debug;

use crate::{ToolCallIndexing, response::WireUsage};

/// One `chat.completion.chunk` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Option<Vec<ChunkChoice>>,
    pub usage: Option<WireUsage>,
    /// In-band failure some servers send after a 200 status.
    pub error: Option<ChunkError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// A vendor-indexed call whose name has not arrived yet.
#[derive(Debug)]
struct HeldCall {
    key: u32,
    id: Option<String>,
    arguments: String,
}

/// Turns Chat Completions chunks into canonical events.
///
/// Text and reasoning each get one block, allocated on their first
/// fragment. Tool calls get a block per call, keyed as configured by
/// [`ToolCallIndexing`]. With vendor indexing, a call's block is reserved
/// on its first fragment but only started once its name is known.
#[derive(Debug, Default)]
pub struct ChatChunkDecoder {
    indexing: ToolCallIndexing,
    text: Option<usize>,
    thinking: Option<usize>,
    tools: HashMap<u32, usize>,
    held: BTreeMap<usize, HeldCall>,
    last_tool: Option<usize>,
}

impl ChatChunkDecoder {
    #[must_use]
    pub fn new(indexing: ToolCallIndexing) -> Self {
        Self {
            indexing,
            ..Self::default()
        }
    }

    fn text_index(&mut self, state: &mut StreamState) -> usize {
        *self.text.get_or_insert_with(|| state.allocate_index())
    }

    fn thinking_index(&mut self, state: &mut StreamState) -> usize {
        *self.thinking.get_or_insert_with(|| state.allocate_index())
    }

    fn tool_call(&mut self, position: usize, call: ToolCallDelta, state: &mut StreamState) {
        let function = call.function.unwrap_or_default();
        let id = non_empty(call.id);
        let name = non_empty(function.name);

        if self.indexing == ToolCallIndexing::VendorIndex {
            let key = call
                .index
                .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX));
            self.vendor_indexed(key, id, name, function.arguments, state);
            return;
        }

        let block = match self.last_tool {
            Some(block) if id.is_none() && name.is_none() => block,
            _ => {
                let block = state.allocate_index();
                state.tool_start(
                    block,
                    id.unwrap_or_else(|| format!("call_{block}")),
                    name.unwrap_or_default(),
                );
                block
            }
        };
        self.last_tool = Some(block);

        if let Some(arguments) = function.arguments {
            state.tool_args(block, &arguments);
        }
    }

    fn vendor_indexed(
        &mut self,
        key: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
        state: &mut StreamState,
    ) {
        let block = match self.tools.get(&key) {
            Some(block) => *block,
            None => {
                let block = state.allocate_index();
                self.tools.insert(key, block);
                self.held.insert(
                    block,
                    HeldCall {
                        key,
                        id: None,
                        arguments: String::new(),
                    },
                );
                block
            }
        };

        let Some(held) = self.held.get_mut(&block) else {
            if let Some(arguments) = arguments {
                state.tool_args(block, &arguments);
            }
            return;
        };
        if held.id.is_none() {
            held.id = id;
        }
        if let Some(arguments) = arguments {
            held.arguments.push_str(&arguments);
        }
        if let Some(name) = name {
            self.release(block, name, state);
        }
    }

    /// Starts a held call and replays its buffered arguments.
    fn release(&mut self, block: usize, name: String, state: &mut StreamState) {
        if let Some(held) = self.held.remove(&block) {
            state.tool_start(
                block,
                held.id.unwrap_or_else(|| format!("call_{}", held.key)),
                name,
            );
            state.tool_args(block, &held.arguments);
        }
    }

    /// Calls still waiting for a name at the finish signal start nameless.
    fn release_all(&mut self, state: &mut StreamState) {
        let blocks: Vec<usize> = self.held.keys().copied().collect();
        for block in blocks {
            debug!(block, "tool call finished without a name");
            self.release(block, String::new(), state);
        }
    }
}

impl ChunkDecoder for ChatChunkDecoder {
    type Chunk = ChatChunk;

    fn decode(&mut self, chunk: ChatChunk, state: &mut StreamState) -> Result<(), RequestError> {
        if let Some(error) = chunk.error {
            return Err(RequestError::Stream {
                error_type: error.kind.unwrap_or_else(|| "error".to_string()),
                message: error.message,
            });
        }

        state.set_id(&chunk.id);
        state.set_model(&chunk.model);
        if let Some(usage) = chunk.usage {
            state.merge_usage(&Usage::from(usage));
        }
        state.start_message();

        let Some(choice) = chunk.choices.and_then(|c| c.into_iter().next()) else {
            return Ok(());
        };
        if state.is_finished() {
            debug!("ignoring content after finish_reason");
            return Ok(());
        }

        let delta = choice.delta;
        if let Some(reasoning) = non_empty(delta.reasoning.or(delta.reasoning_content)) {
            let index = self.thinking_index(state);
            state.thinking(index, &reasoning);
        }
        if let Some(text) = non_empty(delta.content) {
            let index = self.text_index(state);
            state.text(index, &text);
        }
        for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
            self.tool_call(position, call, state);
        }

        // Completion waits for `[DONE]` so a trailing usage chunk still counts.
        if let Some(reason) = non_empty(choice.finish_reason) {
            self.release_all(state);
            state.finish(Some(StopReason::from_vendor(&reason)));
        }
        Ok(())
    }
}
