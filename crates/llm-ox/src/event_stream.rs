use async_stream::stream;
use futures_util::stream::BoxStream;
use tracing::debug;

use crate::{
    accumulator::ResponseAccumulator,
    context::RequestContext,
    decoder::{FrameDecoder, FrameError, StreamState},
    error::RequestError,
    event::Event,
    hooks::Hooks,
    response::Response,
    streaming::{Frame, SseParser},
};

/// Pull iterator over the canonical events of one streaming call.
///
/// Owns the HTTP body until the stream ends or [`close`](Self::close) is
/// called. There is no background task: every read happens inside
/// [`next`](Self::next).
///
/// ```ignore
/// let mut stream = provider.stream(&ctx, &options).await?;
/// while stream.next().await {
///     println!("{:?}", stream.event());
/// }
/// if let Some(err) = stream.err() {
///     eprintln!("stream failed: {err}");
/// }
/// stream.close()?;
/// ```
pub struct EventStream {
    parser: Option<SseParser>,
    decoder: Box<dyn FrameDecoder>,
    state: StreamState,
    current: Option<Event>,
    error: Option<RequestError>,
    done: bool,
    ctx: RequestContext,
    hooks: Hooks,
}

impl EventStream {
    pub fn new(
        parser: SseParser,
        decoder: impl FrameDecoder + 'static,
        prefill: Option<String>,
        ctx: RequestContext,
        hooks: Hooks,
    ) -> Self {
        Self {
            parser: Some(parser),
            decoder: Box::new(decoder),
            state: StreamState::new(prefill),
            current: None,
            error: None,
            done: false,
            ctx,
            hooks,
        }
    }

    /// Advances to the next event, reading from the body as needed.
    ///
    /// Returns `false` once the stream is over; [`err`](Self::err) then
    /// tells a clean end from a failure.
    pub async fn next(&mut self) -> bool {
        self.current = None;
        if self.done {
            return false;
        }

        loop {
            if let Some(event) = self.state.pop() {
                if let Err(err) = self.hooks.after_event(&event) {
                    self.fail(RequestError::Hook(err));
                    return false;
                }
                self.current = Some(event);
                return true;
            }

            if self.state.is_completed() {
                debug!("stream completed");
                self.release();
                return false;
            }

            let Some(parser) = self.parser.as_mut() else {
                debug!("stream ended without message_stop");
                self.done = true;
                return false;
            };

            let frame = tokio::select! {
                biased;
                err = self.ctx.done() => Err(err),
                frame = parser.next_frame() => frame,
            };

            match frame {
                Ok(Some(Frame::Data(data))) => {
                    match self.decoder.decode_frame(&data, &mut self.state) {
                        Ok(()) => {}
                        Err(FrameError::Malformed(err)) => {
                            debug!(error = %err, frame = %data, "skipping malformed frame");
                        }
                        Err(FrameError::Fatal(err)) => {
                            self.fail(err);
                            return false;
                        }
                    }
                }
                Ok(Some(Frame::Done) | None) => {
                    self.decoder.end_of_stream(&mut self.state);
                    self.parser = None;
                }
                Err(err) => {
                    self.fail(err);
                    return false;
                }
            }
        }
    }

    /// The event made current by the last successful [`next`](Self::next).
    #[must_use]
    pub fn event(&self) -> Option<&Event> {
        self.current.as_ref()
    }

    /// The error that ended the stream, if any.
    #[must_use]
    pub fn err(&self) -> Option<&RequestError> {
        self.error.as_ref()
    }

    pub fn take_err(&mut self) -> Option<RequestError> {
        self.error.take()
    }

    /// Releases the body. Safe to call any number of times.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature leaves room for transports that can.
    pub fn close(&mut self) -> Result<(), RequestError> {
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        self.parser = None;
        self.done = true;
    }

    fn fail(&mut self, err: RequestError) {
        debug!(error = %err, "stream terminated");
        self.error = Some(err);
        self.current = None;
        self.release();
    }

    /// Folds the remaining events into `acc`, leaving partial output in it
    /// when the stream fails.
    ///
    /// # Errors
    ///
    /// The stream's terminal error, an accumulation error, or
    /// `IncompleteStream` when the body ended without `message_stop`.
    pub async fn accumulate_into(&mut self, acc: &mut ResponseAccumulator) -> Result<(), RequestError> {
        while self.next().await {
            if let Some(event) = &self.current {
                if let Err(err) = acc.add_event(event) {
                    self.release();
                    return Err(err.into());
                }
            }
        }
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if !acc.is_complete() {
            return Err(RequestError::IncompleteStream);
        }
        Ok(())
    }

    /// Drains the stream into a complete [`Response`].
    ///
    /// # Errors
    ///
    /// See [`accumulate_into`](Self::accumulate_into).
    pub async fn accumulate(mut self) -> Result<Response, RequestError> {
        let mut acc = ResponseAccumulator::new();
        self.accumulate_into(&mut acc).await?;
        Ok(acc.response())
    }

    /// Adapts the iterator to a `Stream`; a terminal error is yielded last.
    pub fn into_stream(mut self) -> BoxStream<'static, Result<Event, RequestError>> {
        Box::pin(stream! {
            while self.next().await {
                if let Some(event) = self.current.take() {
                    yield Ok(event);
                }
            }
            if let Some(err) = self.error.take() {
                yield Err(err);
            }
        })
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("current", &self.current)
            .field("error", &self.error)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        content::Content,
        decoder::ChunkDecoder,
        event::EventKind,
        hooks::Hook,
        error::HookError,
    };
    use bytes::Bytes;
    use futures_util::{StreamExt, stream as fstream};
    use serde::Deserialize;

    /// Minimal dialect: `{"text": ..}` chunks, `{"finish": true}` ends.
    #[derive(Deserialize)]
    struct TestChunk {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        finish: bool,
        #[serde(default)]
        fail: bool,
    }

    struct TestDecoder;

    impl ChunkDecoder for TestDecoder {
        type Chunk = TestChunk;

        fn decode(&mut self, chunk: TestChunk, state: &mut StreamState) -> Result<(), RequestError> {
            if chunk.fail {
                return Err(RequestError::Stream {
                    error_type: "overloaded_error".into(),
                    message: "busy".into(),
                });
            }
            if let Some(text) = chunk.text {
                state.text(0, &text);
            }
            if chunk.finish {
                state.finish(None);
            }
            Ok(())
        }
    }

    fn stream_of(items: Vec<Result<&'static str, RequestError>>) -> EventStream {
        let items: Vec<Result<Bytes, RequestError>> = items
            .into_iter()
            .map(|i| i.map(|s| Bytes::from_static(s.as_bytes())))
            .collect();
        EventStream::new(
            SseParser::from_byte_stream(fstream::iter(items)),
            TestDecoder,
            None,
            RequestContext::new(),
            Hooks::new(),
        )
    }

    #[tokio::test]
    async fn malformed_frame_between_text_frames_is_skipped() {
        let stream = stream_of(vec![
            Ok("data: {\"text\":\"Hel\"}\n\n"),
            Ok("data: {not json\n\n"),
            Ok("data: {\"text\":\"lo\"}\n\n"),
            Ok("data: {\"finish\":true}\n\ndata: [DONE]\n\n"),
        ]);
        let response = stream.accumulate().await.unwrap();
        assert_eq!(response.content, vec![Content::text("Hello")]);
    }

    #[tokio::test]
    async fn transport_error_does_not_fabricate_message_stop() {
        let mut stream = stream_of(vec![
            Ok("data: {\"text\":\"partial\"}\n\n"),
            Err(RequestError::Io(std::io::Error::other("connection reset"))),
        ]);

        let mut kinds = Vec::new();
        while stream.next().await {
            kinds.push(stream.event().map(Event::kind));
        }
        assert!(!kinds.contains(&Some(EventKind::MessageStop)));
        assert!(matches!(stream.err(), Some(RequestError::Io(_))));
        assert!(stream.event().is_none());
    }

    #[tokio::test]
    async fn partial_output_survives_a_broken_stream() {
        let mut stream = stream_of(vec![
            Ok("data: {\"text\":\"partial\"}\n\n"),
            Err(RequestError::Io(std::io::Error::other("reset"))),
        ]);
        let mut acc = ResponseAccumulator::new();
        let err = stream.accumulate_into(&mut acc).await.unwrap_err();
        assert!(matches!(err, RequestError::Io(_)));
        assert!(!acc.is_complete());
        assert_eq!(acc.response().content, vec![Content::text("partial")]);
    }

    #[tokio::test]
    async fn end_of_body_after_finish_completes_the_message() {
        let stream = stream_of(vec![Ok("data: {\"text\":\"hi\",\"finish\":true}\n\n")]);
        let events: Vec<_> = stream
            .into_stream()
            .map(|e| e.unwrap().kind())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                EventKind::MessageStart,
                EventKind::ContentBlockStart,
                EventKind::ContentBlockDelta,
                EventKind::ContentBlockStop,
                EventKind::MessageDelta,
                EventKind::MessageStop,
            ]
        );
    }

    #[tokio::test]
    async fn end_of_body_without_finish_is_incomplete() {
        let mut stream = stream_of(vec![Ok("data: {\"text\":\"The answer is\"}\n\ndata: [DONE]\n\n")]);
        let mut acc = ResponseAccumulator::new();
        let err = stream.accumulate_into(&mut acc).await.unwrap_err();
        assert!(matches!(err, RequestError::IncompleteStream));
        assert!(!acc.is_complete());
        assert_eq!(acc.response().text(), "The answer is");
        assert!(stream.close().is_ok());
    }

    #[tokio::test]
    async fn fatal_frame_ends_the_stream() {
        let mut stream = stream_of(vec![Ok("data: {\"fail\":true}\n\ndata: {\"text\":\"x\"}\n\n")]);
        assert!(!stream.next().await);
        assert!(matches!(stream.err(), Some(RequestError::Stream { .. })));
        assert!(!stream.next().await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut stream = stream_of(vec![Ok("data: {\"text\":\"hi\"}\n\n")]);
        assert!(stream.next().await);
        assert!(stream.close().is_ok());
        assert!(stream.close().is_ok());
        assert!(!stream.next().await);
        assert!(stream.err().is_none());
    }

    #[tokio::test]
    async fn cancelled_context_surfaces_through_err() {
        let ctx = RequestContext::new();
        let items: Vec<Result<Bytes, RequestError>> = Vec::new();
        let pending = fstream::iter(items).chain(fstream::pending());
        let mut stream = EventStream::new(
            SseParser::from_byte_stream(pending),
            TestDecoder,
            None,
            ctx.clone(),
            Hooks::new(),
        );
        ctx.cancel();
        assert!(!stream.next().await);
        assert!(matches!(stream.err(), Some(RequestError::Cancelled)));
    }

    struct StopAfterStart;

    impl Hook for StopAfterStart {
        fn after_event(&self, event: &Event) -> Result<(), HookError> {
            if event.kind() == EventKind::ContentBlockStart {
                return Err("no blocks please".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn hook_error_aborts_the_stream() {
        let items: Vec<Result<Bytes, RequestError>> =
            vec![Ok(Bytes::from_static(b"data: {\"text\":\"hi\"}\n\n"))];
        let mut stream = EventStream::new(
            SseParser::from_byte_stream(fstream::iter(items)),
            TestDecoder,
            None,
            RequestContext::new(),
            Hooks::new().with(StopAfterStart),
        );
        assert!(stream.next().await);
        assert!(!stream.next().await);
        assert!(matches!(stream.err(), Some(RequestError::Hook(_))));
    }
}
