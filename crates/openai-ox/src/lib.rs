#![cfg_attr(not(test), deny(unsafe_code))]
#![warn(
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::missing_docs_in_private_items
)]

//! OpenAI Chat Completions dialect.
//!
//! Also serves any server that speaks the same wire format; see
//! [`ToolCallIndexing`] for the one behaviour that differs between them.

pub mod request;
pub mod response;
pub mod stream;

pub use request::ChatRequest;
pub use response::ChatCompletion;
pub use stream::{ChatChunk, ChatChunkDecoder};

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
use strum::{Display, EnumString};

use crate::request::Settings;

const BASE_URL: &str = "https://api.openai.com/v1";
const CHAT_URL: &str = "chat/completions";
const DEFAULT_MODEL: &str = "gpt-5";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const PROVIDER_NAME: &str = "openai";

/// How streamed tool-call fragments are assigned to content blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ToolCallIndexing {
    /// Fragments sharing the vendor `index` belong to one call.
    #[default]
    VendorIndex,
    /// A fragment with an id or name starts a new call; bare argument
    /// fragments extend the latest one.
    PerDelta,
}

#[derive(Clone, Builder)]
pub struct OpenAi {
    #[builder(into)]
    pub(crate) api_key: String,
    #[builder(default)]
    pub(crate) client: reqwest::Client,
    #[cfg(feature = "leaky-bucket")]
    pub(crate) leaky_bucket: Option<Arc<RateLimiter>>,
    #[builder(default = BASE_URL.to_string(), into)]
    pub(crate) base_url: String,
    #[builder(default = DEFAULT_MODEL.to_string(), into)]
    pub(crate) model: String,
    #[builder(default = DEFAULT_MAX_TOKENS)]
    pub(crate) max_tokens: u32,
    /// Role used for the system prompt; newer models expect `developer`.
    #[builder(default = "developer".to_string(), into)]
    pub(crate) system_role: String,
    #[builder(default)]
    pub(crate) tool_call_indexing: ToolCallIndexing,
    #[builder(default = true)]
    pub(crate) include_stream_usage: bool,
    #[builder(default)]
    pub(crate) retry: RetryPolicy,
    /// Name reported to hooks and logs.
    #[builder(into)]
    pub(crate) name: Option<String>,
}

impl OpenAi {
    /// Create a new client with the provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::builder().api_key(api_key).build()
    }

    /// # Errors
    ///
    /// Fails when `OPENAI_API_KEY` is not set.
    pub fn load_from_env() -> Result<Self, std::env::VarError> {
        let api_key = std::env::var("OPENAI_API_KEY")?;
        Ok(Self::builder().api_key(api_key).build())
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn settings(&self) -> Settings<'_> {
        Settings {
            model: &self.model,
            max_tokens: self.max_tokens,
            system_role: &self.system_role,
            include_stream_usage: self.include_stream_usage,
        }
    }

    fn requests(&self) -> Result<RequestBuilder, RequestError> {
        if self.api_key.is_empty() {
            return Err(RequestError::MissingApiKey);
        }
        let config = RequestConfig::new(&self.base_url)
            .with_auth(AuthMethod::Bearer(self.api_key.clone()));
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
        let request = ChatRequest::from_options(options, self.settings(), stream)?;
        Ok(serde_json::to_value(request)?)
    }
}

impl Provider for OpenAi {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(PROVIDER_NAME)
    }

    async fn generate(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<Response, RequestError> {
        let body = self.encode(options, false)?;
        let completion: ChatCompletion = self
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
        finish_response(completion.into_response()?, options)
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
                ChatChunkDecoder::new(self.tool_call_indexing),
            )
            .await
    }
}

impl fmt::Debug for OpenAi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAi")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("tool_call_indexing", &self.tool_call_indexing)
            .finish_non_exhaustive()
    }
}
