use llm_ox::{ChunkDecoder, RequestError, StopReason, StreamState, Usage};
use tracing::debug;

use crate::{
    content::Part,
    response::{GenerateContentResponse, stop_reason},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Text(usize),
    Thinking(usize),
}

/// Turns streamed `GenerateContentResponse` frames into canonical events.
///
/// Frames carry whole parts rather than deltas. A run of text or thought
/// parts shares one block; a function call arrives complete and becomes a
/// block that is started, filled and stopped at once.
#[derive(Debug, Default)]
pub struct CandidateDecoder {
    model: String,
    run: Option<Run>,
    called_tools: bool,
}

impl CandidateDecoder {
    /// `model` names the response when the vendor omits `modelVersion`.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    fn end_run(&mut self, state: &mut StreamState) {
        if let Some(Run::Text(index) | Run::Thinking(index)) = self.run.take() {
            state.stop(index);
        }
    }

    fn part(&mut self, part: Part, state: &mut StreamState) {
        if let Some(call) = &part.function_call {
            self.end_run(state);
            let index = state.allocate_index();
            state.tool_start(index, call.call_id(), call.name.clone());
            state.tool_args(index, &call.input().to_string());
            state.stop(index);
            self.called_tools = true;
            return;
        }

        let thought = part.is_thought();
        let Some(text) = part.text.filter(|t| !t.is_empty()) else {
            return;
        };
        let index = match (self.run, thought) {
            (Some(Run::Text(index)), false) | (Some(Run::Thinking(index)), true) => index,
            _ => {
                self.end_run(state);
                let index = state.allocate_index();
                self.run = Some(if thought {
                    Run::Thinking(index)
                } else {
                    Run::Text(index)
                });
                index
            }
        };

        if thought {
            state.thinking(index, &text);
            if let Some(signature) = part.thought_signature {
                state.signature(index, &signature);
            }
        } else {
            state.text(index, &text);
        }
    }
}

impl ChunkDecoder for CandidateDecoder {
    type Chunk = GenerateContentResponse;

    fn decode(
        &mut self,
        chunk: GenerateContentResponse,
        state: &mut StreamState,
    ) -> Result<(), RequestError> {
        if let Some(error) = chunk.error {
            return Err(RequestError::Stream {
                error_type: error.status,
                message: error.message,
            });
        }

        state.set_id(chunk.response_id.as_deref().unwrap_or_default());
        state.set_model(chunk.model_version.as_deref().unwrap_or_default());
        state.set_model(&self.model);
        if let Some(usage) = chunk.usage_metadata {
            state.merge_usage(&Usage::from(usage));
        }
        state.start_message();

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
                debug!(%reason, "prompt blocked");
                state.finish(Some(StopReason::ContentFilter));
            }
            return Ok(());
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            self.part(part, state);
        }
        if let Some(reason) = candidate.finish_reason {
            self.run = None;
            state.finish(Some(stop_reason(&reason, self.called_tools)));
        }
        Ok(())
    }
}
