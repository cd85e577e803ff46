use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};

use crate::error::RequestError;

/// Sentinel payload that closes OpenAI-style streams.
const DONE: &str = "[DONE]";

/// One dispatched Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Joined `data:` lines of one event, not yet parsed.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RequestError>> + Send>>;

/// Server-Sent Events parser for streaming responses
pub struct SseParser {
    byte_stream: ByteStream,
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    /// A `[DONE]` arrived while another event was still pending dispatch.
    done_pending: bool,
    finished: bool,
}

impl SseParser {
    pub fn new(response: reqwest::Response) -> Self {
        Self::from_byte_stream(response.bytes_stream().map_err(RequestError::from))
    }

    pub fn from_byte_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, RequestError>> + Send + 'static,
    {
        Self {
            byte_stream: Box::pin(stream),
            buffer: Vec::new(),
            data_lines: Vec::new(),
            done_pending: false,
            finished: false,
        }
    }

    /// Get the next frame from the stream, `None` once the body is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the transport error if reading the body fails.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, RequestError> {
        loop {
            if std::mem::take(&mut self.done_pending) {
                return Ok(Some(Frame::Done));
            }

            if let Some(frame) = self.try_frame_from_buffer() {
                return Ok(Some(frame));
            }

            if self.finished {
                return Ok(None);
            }

            match self.byte_stream.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => {
                    self.finished = true;
                    return Ok(self.flush());
                }
            }
        }
    }

    /// Try to dispatch an event from complete lines in the buffer
    fn try_frame_from_buffer(&mut self) -> Option<Frame> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes = self.buffer.drain(..=pos).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(&line_bytes);

            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }

        None
    }

    /// Body ended: an unterminated last line still counts.
    fn flush(&mut self) -> Option<Frame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }

        self.finalize_event()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        let line = line.trim_end_matches(['\n', '\r']);

        if line.trim().is_empty() {
            return self.finalize_event();
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            let data = rest.strip_prefix(' ').unwrap_or(rest);

            if data.trim() == DONE {
                if let Some(frame) = self.finalize_event() {
                    self.done_pending = true;
                    return Some(frame);
                }
                return Some(Frame::Done);
            }

            self.data_lines.push(data.to_string());
        }

        // Ignore other SSE fields (event, id, retry)
        None
    }

    fn finalize_event(&mut self) -> Option<Frame> {
        if self.data_lines.is_empty() {
            return None;
        }

        let payload = self.data_lines.join("\n");
        self.data_lines.clear();

        if payload.trim().is_empty() {
            return None;
        }

        Some(Frame::Data(payload))
    }
}

impl std::fmt::Debug for SseParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseParser")
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
