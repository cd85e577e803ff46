//! The decoding engine shared by every vendor.
//!
//! A vendor only translates its own chunk type into calls on
//! [`StreamState`]; block bookkeeping, prefill, the finish fan-out and the
//! terminal events all live here.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    error::RequestError,
    event::{ContentBlock, Delta, Event},
    message::Role,
    response::{Response, StopReason},
    usage::Usage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenKind {
    Text,
    Thinking,
    ToolUse,
}

/// Per-stream block bookkeeping and the queue of events not yet handed out.
#[derive(Debug, Default)]
pub struct StreamState {
    id: String,
    model: String,
    usage: Usage,
    stop_reason: Option<StopReason>,
    open: BTreeMap<usize, OpenKind>,
    seen: BTreeSet<usize>,
    next_index: usize,
    prefill: Option<String>,
    started: bool,
    finished: bool,
    completed: bool,
    queue: VecDeque<Event>,
}

impl StreamState {
    /// `prefill` is prepended to the first text delta of the stream.
    #[must_use]
    pub fn new(prefill: Option<String>) -> Self {
        Self {
            prefill: prefill.filter(|p| !p.is_empty()),
            ..Self::default()
        }
    }

    pub fn set_id(&mut self, id: &str) {
        if self.id.is_empty() && !id.is_empty() {
            self.id = id.to_string();
        }
    }

    pub fn set_model(&mut self, model: &str) {
        if self.model.is_empty() && !model.is_empty() {
            self.model = model.to_string();
        }
    }

    /// Records running usage totals; see [`Usage::merge_latest`].
    pub fn merge_usage(&mut self, usage: &Usage) {
        self.usage.merge_latest(usage);
    }

    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    #[must_use]
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Emits `MessageStart` the first time it is called.
    pub fn start_message(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.queue.push_back(Event::MessageStart {
            id: self.id.clone(),
            model: self.model.clone(),
            usage: self.usage,
        });
    }

    /// Hands out the next unused block index.
    pub fn allocate_index(&mut self) -> usize {
        while self.seen.contains(&self.next_index) {
            self.next_index += 1;
        }
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    #[must_use]
    pub fn is_open(&self, index: usize) -> bool {
        self.open.contains_key(&index)
    }

    /// Emits `ContentBlockStart` unless `index` was already used.
    pub fn start_block(&mut self, index: usize, block: ContentBlock) -> bool {
        if self.completed || !self.seen.insert(index) {
            debug!(index, "ignoring restart of content block");
            return false;
        }
        self.start_message();
        let kind = match &block {
            ContentBlock::Text => OpenKind::Text,
            ContentBlock::Thinking => OpenKind::Thinking,
            ContentBlock::ToolUse { .. } => OpenKind::ToolUse,
        };
        self.open.insert(index, kind);
        self.queue
            .push_back(Event::ContentBlockStart { index, block });
        true
    }

    /// Appends text at `index`, starting a text block on first use.
    ///
    /// The first non-empty fragment of the stream carries the prefill unless
    /// the model already echoed it.
    pub fn text(&mut self, index: usize, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if !self.is_open(index) && !self.start_block(index, ContentBlock::Text) {
            return;
        }
        if self.open.get(&index) != Some(&OpenKind::Text) {
            debug!(index, kind = "text", "dropping delta of the wrong kind");
            return;
        }
        // The prefill is spent only on a fragment that is actually emitted.
        let text = match self.prefill.take() {
            Some(prefill) if !echoes(&prefill, fragment) => prefill + fragment,
            _ => fragment.to_string(),
        };
        self.queue.push_back(Event::ContentBlockDelta {
            index,
            delta: Delta::Text { text },
        });
    }

    pub fn thinking(&mut self, index: usize, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if !self.is_open(index) && !self.start_block(index, ContentBlock::Thinking) {
            return;
        }
        self.delta(
            index,
            OpenKind::Thinking,
            Delta::Thinking {
                thinking: fragment.to_string(),
            },
        );
    }

    pub fn signature(&mut self, index: usize, signature: &str) {
        self.delta(
            index,
            OpenKind::Thinking,
            Delta::Signature {
                signature: signature.to_string(),
            },
        );
    }

    pub fn tool_start(&mut self, index: usize, id: impl Into<String>, name: impl Into<String>) {
        self.start_block(
            index,
            ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
            },
        );
    }

    /// Forwards a raw argument fragment; never parsed here.
    pub fn tool_args(&mut self, index: usize, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.delta(
            index,
            OpenKind::ToolUse,
            Delta::InputJson {
                partial_json: fragment.to_string(),
            },
        );
    }

    fn delta(&mut self, index: usize, expected: OpenKind, delta: Delta) {
        match self.open.get(&index) {
            Some(kind) if *kind == expected => {
                self.queue.push_back(Event::ContentBlockDelta { index, delta });
            }
            Some(_) => debug!(index, kind = delta.kind(), "dropping delta of the wrong kind"),
            None => debug!(index, kind = delta.kind(), "dropping delta for a block that is not open"),
        }
    }

    /// Emits `ContentBlockStop` if `index` is open.
    pub fn stop(&mut self, index: usize) {
        if self.open.remove(&index).is_some() {
            self.queue.push_back(Event::ContentBlockStop { index });
        }
    }

    /// Vendor finish signal: stops every open block in ascending order.
    ///
    /// The terminal events wait for [`complete`](Self::complete) so usage
    /// sent after the finish signal is still reported.
    pub fn finish(&mut self, reason: Option<StopReason>) {
        if let Some(reason) = reason {
            self.stop_reason = Some(reason);
        }
        let open = std::mem::take(&mut self.open);
        self.queue
            .extend(open.into_keys().map(|index| Event::ContentBlockStop { index }));
        self.finished = true;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Emits `MessageDelta` and `MessageStop` exactly once.
    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.start_message();
        self.finish(None);
        self.completed = true;

        self.queue.push_back(Event::MessageDelta {
            stop_reason: self.stop_reason.clone(),
            usage: self.usage,
        });
        self.queue.push_back(Event::MessageStop {
            response: Some(Box::new(Response {
                id: self.id.clone(),
                model: self.model.clone(),
                role: Role::Assistant,
                content: Vec::new(),
                usage: self.usage,
                stop_reason: self.stop_reason.clone(),
            })),
        });
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }
}

/// Models sometimes repeat the prefill, in full or as its first piece.
fn echoes(prefill: &str, fragment: &str) -> bool {
    fragment.starts_with(prefill) || prefill.starts_with(fragment)
}

/// Translates one vendor chunk into calls on a [`StreamState`].
pub trait ChunkDecoder: Send {
    type Chunk: DeserializeOwned;

    /// # Errors
    ///
    /// Returns an error only for conditions that must end the stream, such
    /// as an in-band vendor error frame.
    fn decode(&mut self, chunk: Self::Chunk, state: &mut StreamState) -> Result<(), RequestError>;

    /// Called on the `[DONE]` sentinel or a clean end of body.
    ///
    /// The message completes only if the vendor already sent its finish
    /// signal; otherwise the stream stays incomplete.
    fn end_of_stream(&mut self, state: &mut StreamState) {
        if state.is_finished() {
            state.complete();
        } else {
            debug!("body ended before a finish signal");
        }
    }
}

/// Why a single frame produced no events.
#[derive(Debug)]
pub enum FrameError {
    /// Not valid vendor JSON; the frame is skipped.
    Malformed(serde_json::Error),
    /// The stream cannot continue.
    Fatal(RequestError),
}

/// Object-safe face of [`ChunkDecoder`] operating on raw frame payloads.
pub trait FrameDecoder: Send {
    /// # Errors
    ///
    /// See [`FrameError`].
    fn decode_frame(&mut self, data: &str, state: &mut StreamState) -> Result<(), FrameError>;

    fn end_of_stream(&mut self, state: &mut StreamState);
}

impl<D: ChunkDecoder> FrameDecoder for D {
    fn decode_frame(&mut self, data: &str, state: &mut StreamState) -> Result<(), FrameError> {
        let chunk = serde_json::from_str::<D::Chunk>(data).map_err(FrameError::Malformed)?;
        self.decode(chunk, state).map_err(FrameError::Fatal)
    }

    fn end_of_stream(&mut self, state: &mut StreamState) {
        ChunkDecoder::end_of_stream(self, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn drain(state: &mut StreamState) -> Vec<Event> {
        std::iter::from_fn(|| state.pop()).collect()
    }

    #[test]
    fn first_text_fragment_starts_block_and_carries_prefill() {
        let mut state = StreamState::new(Some("<json>".into()));
        state.text(0, "");
        state.text(0, "{\"a\"");
        state.text(0, ":1}");

        let events = drain(&mut state);
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::MessageStart,
                EventKind::ContentBlockStart,
                EventKind::ContentBlockDelta,
                EventKind::ContentBlockDelta,
            ]
        );
        assert_eq!(events[2], Event::text_delta(0, "<json>{\"a\""));
        assert_eq!(events[3], Event::text_delta(0, ":1}"));
    }

    #[test]
    fn echoed_prefill_is_not_doubled() {
        let mut state = StreamState::new(Some("Sure".into()));
        state.text(0, "Sure, here it is");
        let events = drain(&mut state);
        assert_eq!(events.last(), Some(&Event::text_delta(0, "Sure, here it is")));

        let mut state = StreamState::new(Some("```json".into()));
        state.text(0, "```");
        state.text(0, "json\n{}");
        let texts: Vec<_> = drain(&mut state)
            .into_iter()
            .filter(|e| e.kind() == EventKind::ContentBlockDelta)
            .collect();
        assert_eq!(
            texts,
            vec![Event::text_delta(0, "```"), Event::text_delta(0, "json\n{}")]
        );
    }

    #[test]
    fn refused_text_does_not_spend_the_prefill() {
        let mut state = StreamState::new(Some("Sure, ".into()));
        state.thinking(0, "hmm");
        state.text(0, "wrong kind");
        state.stop(0);
        state.text(0, "restart");
        state.text(1, "here it is");

        let deltas: Vec<_> = drain(&mut state)
            .into_iter()
            .filter(|e| e.kind() == EventKind::ContentBlockDelta)
            .collect();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[1], Event::text_delta(1, "Sure, here it is"));
    }

    #[test]
    fn finish_stops_open_blocks_ascending_then_completes_once() {
        let mut state = StreamState::new(None);
        state.tool_start(2, "call_b", "b");
        state.text(0, "hi");
        state.tool_start(1, "call_a", "a");
        state.tool_args(1, "{}");
        drain(&mut state);

        state.finish(Some(StopReason::ToolUse));
        state.merge_usage(&Usage::new(5, 7));
        state.complete();
        state.complete();

        let events = drain(&mut state);
        let stops: Vec<_> = events
            .iter()
            .filter(|e| e.kind() == EventKind::ContentBlockStop)
            .filter_map(Event::index)
            .collect();
        assert_eq!(stops, vec![0, 1, 2]);
        assert_eq!(
            events[3],
            Event::MessageDelta {
                stop_reason: Some(StopReason::ToolUse),
                usage: Usage::new(5, 7),
            }
        );
        assert_eq!(events[4].kind(), EventKind::MessageStop);
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn unknown_and_mismatched_deltas_are_dropped() {
        let mut state = StreamState::new(None);
        state.tool_args(4, "{");
        state.text(0, "x");
        state.tool_args(0, "{");
        state.stop(9);
        let kinds: Vec<_> = drain(&mut state).iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::MessageStart,
                EventKind::ContentBlockStart,
                EventKind::ContentBlockDelta,
            ]
        );
    }

    #[test]
    fn allocate_skips_indices_claimed_by_the_vendor() {
        let mut state = StreamState::new(None);
        state.tool_start(0, "id", "name");
        assert_eq!(state.allocate_index(), 1);
        assert_eq!(state.allocate_index(), 2);
    }
}
