use crate::{
    context::RequestContext,
    error::RequestError,
    event_stream::EventStream,
    options::GenerateOptions,
    response::Response,
};

/// One LLM backend behind the canonical interface.
pub trait Provider: Send + Sync {
    /// Identifier used in logs and hook contexts.
    fn name(&self) -> &str;

    /// Sends one non-streaming request, retrying rate limits and server errors.
    async fn generate(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<Response, RequestError>;

    /// Opens a stream of canonical events. A rejected request fails here,
    /// before any event is produced.
    async fn stream(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<EventStream, RequestError>;
}
