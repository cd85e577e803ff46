use std::collections::BTreeMap;

use crate::{
    content::{Content, ThinkingContent, ToolUseContent},
    error::AccumulateError,
    event::{ContentBlock, Delta, Event},
    message::Role,
    response::{Response, StopReason},
    usage::Usage,
};

/// In-progress content for one block index.
#[derive(Debug)]
enum Builder {
    Text(String),
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        /// Raw argument fragments, unparsed until the block stops.
        json: String,
    },
}

impl Builder {
    fn new(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text => Self::Text(String::new()),
            ContentBlock::Thinking => Self::Thinking {
                thinking: String::new(),
                signature: None,
            },
            ContentBlock::ToolUse { id, name } => Self::ToolUse {
                id: id.clone(),
                name: name.clone(),
                json: String::new(),
            },
        }
    }

    fn apply(&mut self, index: usize, delta: &Delta) -> Result<(), AccumulateError> {
        match (self, delta) {
            (Self::Text(buf), Delta::Text { text }) => buf.push_str(text),
            (Self::Thinking { thinking, .. }, Delta::Thinking { thinking: more }) => {
                thinking.push_str(more);
            }
            (Self::Thinking { signature, .. }, Delta::Signature { signature: sig }) => {
                signature.get_or_insert_with(String::new).push_str(sig);
            }
            (Self::ToolUse { json, .. }, Delta::InputJson { partial_json }) => {
                json.push_str(partial_json);
            }
            (_, delta) => {
                return Err(AccumulateError::DeltaMismatch {
                    index,
                    delta: delta.kind(),
                });
            }
        }
        Ok(())
    }

    fn finish(self, index: usize) -> Result<Content, AccumulateError> {
        match self {
            Self::Text(text) => Ok(Content::text(text)),
            Self::Thinking {
                thinking,
                signature,
            } => Ok(Content::Thinking(ThinkingContent {
                thinking,
                signature,
            })),
            Self::ToolUse { id, name, json } => {
                // A tool called without arguments streams no fragments at all.
                let input = if json.trim().is_empty() {
                    serde_json::Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&json)
                        .map_err(|source| AccumulateError::MalformedToolInput { index, source })?
                };
                Ok(Content::ToolUse(ToolUseContent { id, name, input }))
            }
        }
    }

    /// Best-effort view of a block that never stopped.
    fn partial(&self) -> Option<Content> {
        match self {
            Self::Text(text) => Some(Content::text(text.clone())),
            Self::Thinking {
                thinking,
                signature,
            } => Some(Content::Thinking(ThinkingContent {
                thinking: thinking.clone(),
                signature: signature.clone(),
            })),
            Self::ToolUse { .. } => None,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Open(Builder),
    Frozen(Content),
    /// Stopped, but its tool input failed to parse.
    Rejected,
}

/// Folds a canonical [`Event`] sequence into one [`Response`].
///
/// Events arriving after `MessageStop` are rejected with
/// [`AccumulateError::AfterComplete`]; the folded state is left untouched.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    id: String,
    model: String,
    usage: Usage,
    stop_reason: Option<StopReason>,
    slots: BTreeMap<usize, Slot>,
    complete: bool,
}

impl ResponseAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the builder state.
    ///
    /// # Errors
    ///
    /// Returns an error on protocol violations (duplicate start, unknown or
    /// stopped index, delta of the wrong kind, event after completion) and
    /// when a tool block's arguments are not valid JSON at stop time.
    pub fn add_event(&mut self, event: &Event) -> Result<(), AccumulateError> {
        if self.complete {
            return Err(AccumulateError::AfterComplete);
        }

        match event {
            Event::MessageStart { id, model, usage } => {
                if !id.is_empty() {
                    self.id.clone_from(id);
                }
                if !model.is_empty() {
                    self.model.clone_from(model);
                }
                self.usage.merge_latest(usage);
            }
            Event::ContentBlockStart { index, block } => {
                if self.slots.contains_key(index) {
                    return Err(AccumulateError::DuplicateBlock(*index));
                }
                self.slots.insert(*index, Slot::Open(Builder::new(block)));
            }
            Event::ContentBlockDelta { index, delta } => match self.slots.get_mut(index) {
                Some(Slot::Open(builder)) => builder.apply(*index, delta)?,
                Some(_) => return Err(AccumulateError::BlockStopped(*index)),
                None => return Err(AccumulateError::UnknownBlock(*index)),
            },
            Event::ContentBlockStop { index } => {
                let slot = self
                    .slots
                    .get_mut(index)
                    .ok_or(AccumulateError::UnknownBlock(*index))?;
                match std::mem::replace(slot, Slot::Rejected) {
                    Slot::Open(builder) => *slot = Slot::Frozen(builder.finish(*index)?),
                    stopped => {
                        *slot = stopped;
                        return Err(AccumulateError::BlockStopped(*index));
                    }
                }
            }
            Event::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason.clone_from(stop_reason);
                }
                self.usage.merge_latest(usage);
            }
            Event::MessageStop { response } => {
                self.complete = true;
                if let Some(response) = response {
                    if !response.id.is_empty() {
                        self.id.clone_from(&response.id);
                    }
                    if !response.model.is_empty() {
                        self.model.clone_from(&response.model);
                    }
                    if !response.usage.is_empty() {
                        self.usage = response.usage;
                    }
                    if response.stop_reason.is_some() {
                        self.stop_reason.clone_from(&response.stop_reason);
                    }
                }
            }
        }
        Ok(())
    }

    /// `true` once a `MessageStop` has been folded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The folded response so far, blocks in ascending index order.
    ///
    /// Open text and thinking blocks contribute their current buffer; open
    /// tool blocks are left out. Check [`is_complete`](Self::is_complete)
    /// before treating this as final.
    #[must_use]
    pub fn response(&self) -> Response {
        let content = self
            .slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Frozen(content) => Some(content.clone()),
                Slot::Open(builder) => builder.partial(),
                Slot::Rejected => None,
            })
            .collect();

        Response {
            id: self.id.clone(),
            model: self.model.clone(),
            role: Role::Assistant,
            content,
            usage: self.usage,
            stop_reason: self.stop_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_text(index: usize) -> Event {
        Event::ContentBlockStart {
            index,
            block: ContentBlock::Text,
        }
    }

    fn start_tool(index: usize) -> Event {
        Event::ContentBlockStart {
            index,
            block: ContentBlock::ToolUse {
                id: format!("call_{index}"),
                name: "calc".into(),
            },
        }
    }

    fn stop(index: usize) -> Event {
        Event::ContentBlockStop { index }
    }

    fn message_stop() -> Event {
        Event::MessageStop { response: None }
    }

    fn fold(acc: &mut ResponseAccumulator, events: &[Event]) {
        for event in events {
            acc.add_event(event).unwrap();
        }
    }

    #[test]
    fn hello_scenario() {
        let mut acc = ResponseAccumulator::new();
        fold(
            &mut acc,
            &[
                start_text(0),
                Event::text_delta(0, "Hel"),
                Event::text_delta(0, "lo"),
                stop(0),
            ],
        );
        assert!(!acc.is_complete());
        acc.add_event(&message_stop()).unwrap();

        assert!(acc.is_complete());
        assert_eq!(acc.response().content, vec![Content::text("Hello")]);
    }

    #[test]
    fn content_follows_index_order_not_arrival_order() {
        let mut acc = ResponseAccumulator::new();
        fold(
            &mut acc,
            &[
                start_text(2),
                start_text(0),
                Event::text_delta(2, "second"),
                Event::text_delta(0, "first"),
                start_tool(1),
                Event::json_delta(1, "{}"),
                stop(2),
                stop(1),
                stop(0),
                message_stop(),
            ],
        );
        let content = acc.response().content;
        assert_eq!(content.len(), 3);
        assert_eq!(content[0], Content::text("first"));
        assert!(content[1].as_tool_use().is_some());
        assert_eq!(content[2], Content::text("second"));
    }

    #[test]
    fn tool_fragments_parse_at_stop() {
        let mut acc = ResponseAccumulator::new();
        fold(
            &mut acc,
            &[
                start_tool(0),
                Event::json_delta(0, "{\"a\":"),
                Event::json_delta(0, "1}"),
                stop(0),
            ],
        );
        let response = acc.response();
        let call = response.tool_calls().next().unwrap();
        assert_eq!(call.input, serde_json::json!({"a": 1}));
        assert_eq!(call.id, "call_0");
    }

    #[test]
    fn truncated_tool_input_is_reported_and_prior_blocks_survive() {
        let mut acc = ResponseAccumulator::new();
        fold(
            &mut acc,
            &[
                start_text(0),
                Event::text_delta(0, "checking"),
                stop(0),
                start_tool(1),
                Event::json_delta(1, "{\"a\":"),
            ],
        );

        let err = acc.add_event(&stop(1)).unwrap_err();
        assert!(matches!(
            err,
            AccumulateError::MalformedToolInput { index: 1, .. }
        ));
        assert_eq!(acc.response().content, vec![Content::text("checking")]);
        assert!(matches!(
            acc.add_event(&stop(1)),
            Err(AccumulateError::BlockStopped(1))
        ));
    }

    #[test]
    fn tool_without_arguments_gets_empty_object() {
        let mut acc = ResponseAccumulator::new();
        fold(&mut acc, &[start_tool(0), stop(0)]);
        let response = acc.response();
        assert_eq!(
            response.tool_calls().next().unwrap().input,
            serde_json::json!({})
        );
    }

    #[test]
    fn protocol_violations_are_errors() {
        let mut acc = ResponseAccumulator::new();
        acc.add_event(&start_text(0)).unwrap();

        assert!(matches!(
            acc.add_event(&start_text(0)),
            Err(AccumulateError::DuplicateBlock(0))
        ));
        assert!(matches!(
            acc.add_event(&Event::text_delta(7, "x")),
            Err(AccumulateError::UnknownBlock(7))
        ));
        assert!(matches!(
            acc.add_event(&stop(7)),
            Err(AccumulateError::UnknownBlock(7))
        ));
        assert!(matches!(
            acc.add_event(&Event::json_delta(0, "{")),
            Err(AccumulateError::DeltaMismatch { index: 0, delta: "input_json" })
        ));

        acc.add_event(&stop(0)).unwrap();
        assert!(matches!(
            acc.add_event(&Event::text_delta(0, "late")),
            Err(AccumulateError::BlockStopped(0))
        ));
    }

    #[test]
    fn events_after_message_stop_are_rejected() {
        let mut acc = ResponseAccumulator::new();
        fold(&mut acc, &[start_text(0), stop(0), message_stop()]);

        assert!(matches!(
            acc.add_event(&start_text(1)),
            Err(AccumulateError::AfterComplete)
        ));
        assert!(matches!(
            acc.add_event(&message_stop()),
            Err(AccumulateError::AfterComplete)
        ));
        assert_eq!(acc.response().content.len(), 1);
    }

    #[test]
    fn partial_output_stays_inspectable() {
        let mut acc = ResponseAccumulator::new();
        fold(
            &mut acc,
            &[
                start_text(0),
                Event::text_delta(0, "half a sent"),
                start_tool(1),
                Event::json_delta(1, "{\"q\":"),
            ],
        );
        assert!(!acc.is_complete());
        assert_eq!(acc.response().content, vec![Content::text("half a sent")]);
    }

    #[test]
    fn thinking_collects_signature() {
        let mut acc = ResponseAccumulator::new();
        fold(
            &mut acc,
            &[
                Event::ContentBlockStart {
                    index: 0,
                    block: ContentBlock::Thinking,
                },
                Event::ContentBlockDelta {
                    index: 0,
                    delta: Delta::Thinking {
                        thinking: "hmm".into(),
                    },
                },
                Event::ContentBlockDelta {
                    index: 0,
                    delta: Delta::Signature {
                        signature: "sig".into(),
                    },
                },
                stop(0),
            ],
        );
        assert_eq!(
            acc.response().content,
            vec![Content::Thinking(ThinkingContent {
                thinking: "hmm".into(),
                signature: Some("sig".into()),
            })]
        );
    }

    #[test]
    fn terminal_response_overrides_ids_and_usage() {
        let mut acc = ResponseAccumulator::new();
        fold(
            &mut acc,
            &[
                Event::MessageStart {
                    id: "msg_1".into(),
                    model: "m".into(),
                    usage: Usage::new(10, 0),
                },
                Event::MessageDelta {
                    stop_reason: Some(StopReason::EndTurn),
                    usage: Usage::new(0, 5),
                },
            ],
        );
        assert_eq!(acc.response().usage, Usage::new(10, 5));

        acc.add_event(&Event::MessageStop {
            response: Some(Box::new(Response {
                id: "msg_final".into(),
                usage: Usage::new(11, 6),
                ..Response::default()
            })),
        })
        .unwrap();

        let response = acc.response();
        assert_eq!(response.id, "msg_final");
        assert_eq!(response.model, "m");
        assert_eq!(response.usage, Usage::new(11, 6));
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
    }
}
