#![cfg_attr(not(test), deny(unsafe_code))]
#![warn(
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::missing_docs_in_private_items
)]

//! Anthropic Messages dialect.

pub mod request;
pub mod response;
pub mod stream;

pub use request::MessagesRequest;
pub use response::MessagesResponse;
pub use stream::{MessageEvent, MessageEventDecoder};

use bon::Builder;
use core::fmt;
#[cfg(feature = "leaky-bucket")]
use leaky_bucket::RateLimiter;
use llm_ox::{
    AuthMethod, Endpoint, EventStream, GenerateOptions, Provider, RequestBuilder, RequestConfig,
    RequestContext, RequestError, Response, RetryPolicy, request_builder::finish_response,
};
#[cfg(feature = "leaky-bucket")]
use std::sync::Arc;

const BASE_URL: &str = "https://api.anthropic.com";
const CHAT_URL: &str = "v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone, Builder)]
pub struct Anthropic {
    #[builder(into)]
    pub(crate) api_key: String,
    #[builder(default)]
    pub(crate) client: reqwest::Client,
    #[cfg(feature = "leaky-bucket")]
    pub(crate) leaky_bucket: Option<Arc<RateLimiter>>,
    #[builder(default = BASE_URL.to_string(), into)]
    pub(crate) base_url: String,
    #[builder(default = API_VERSION.to_string(), into)]
    pub(crate) api_version: String,
    #[builder(default = DEFAULT_MODEL.to_string(), into)]
    pub(crate) model: String,
    /// Required by the API on every request.
    #[builder(default = DEFAULT_MAX_TOKENS)]
    pub(crate) max_tokens: u32,
    #[builder(default)]
    pub(crate) retry: RetryPolicy,
}

impl Anthropic {
    /// Create a new Anthropic client with the provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::builder().api_key(api_key).build()
    }

    /// # Errors
    ///
    /// Fails when `ANTHROPIC_API_KEY` is not set.
    pub fn load_from_env() -> Result<Self, std::env::VarError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")?;
        Ok(Self::builder().api_key(api_key).build())
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn requests(&self) -> Result<RequestBuilder, RequestError> {
        if self.api_key.is_empty() {
            return Err(RequestError::MissingApiKey);
        }
        let config = RequestConfig::new(&self.base_url)
            .with_auth(AuthMethod::ApiKey {
                header_name: "x-api-key".to_string(),
                key: self.api_key.clone(),
            })
            .with_header("anthropic-version", &self.api_version);
        let builder = RequestBuilder::new(self.client.clone(), config);
        #[cfg(feature = "leaky-bucket")]
        let builder = builder.with_rate_limiter(self.leaky_bucket.clone());
        Ok(builder)
    }

    fn encode(
        &self,
        options: &GenerateOptions,
        stream: bool,
    ) -> Result<serde_json::Value, RequestError> {
        options.validate()?;
        let request = MessagesRequest::from_options(options, &self.model, self.max_tokens, stream);
        Ok(serde_json::to_value(request)?)
    }
}

impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<Response, RequestError> {
        let body = self.encode(options, false)?;
        let message: MessagesResponse = self
            .requests()?
            .request_json(
                ctx,
                &self.retry,
                self.name(),
                &Endpoint::new(CHAT_URL),
                body,
                options,
            )
            .await?;
        finish_response(message.into_response()?, options)
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<EventStream, RequestError> {
        let body = self.encode(options, true)?;
        self.requests()?
            .request_stream(
                ctx,
                self.name(),
                &Endpoint::new(CHAT_URL),
                body,
                options,
                MessageEventDecoder,
            )
            .await
    }
}

impl fmt::Debug for Anthropic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anthropic")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
