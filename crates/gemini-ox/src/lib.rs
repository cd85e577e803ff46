#![cfg_attr(not(test), deny(unsafe_code))]
#![warn(
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::missing_docs_in_private_items
)]

//! Google Gemini `generateContent` dialect.

pub mod content;
pub mod request;
pub mod response;
pub mod stream;

pub use request::GenerateContentRequest;
pub use response::GenerateContentResponse;
pub use stream::CandidateDecoder;

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

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone, Builder)]
pub struct Gemini {
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
    #[builder(default)]
    pub(crate) retry: RetryPolicy,
}

impl Gemini {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::builder().api_key(api_key).build()
    }

    /// Reads `GEMINI_API_KEY`, falling back to `GOOGLE_API_KEY`.
    ///
    /// # Errors
    ///
    /// Fails when neither variable is set.
    pub fn load_from_env() -> Result<Self, std::env::VarError> {
        let api_key =
            std::env::var("GEMINI_API_KEY").or_else(|_| std::env::var("GOOGLE_API_KEY"))?;
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
        let config = RequestConfig::new(&self.base_url).with_auth(AuthMethod::ApiKey {
            header_name: "x-goog-api-key".to_string(),
            key: self.api_key.clone(),
        });
        let builder = RequestBuilder::new(self.client.clone(), config);
        #[cfg(feature = "leaky-bucket")]
        let builder = builder.with_rate_limiter(self.leaky_bucket.clone());
        Ok(builder)
    }

    fn encode(&self, options: &GenerateOptions) -> Result<serde_json::Value, RequestError> {
        options.validate()?;
        let request = GenerateContentRequest::from_options(options, self.max_tokens);
        Ok(serde_json::to_value(request)?)
    }
}

impl Provider for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<Response, RequestError> {
        let body = self.encode(options)?;
        let model = options.model_or(&self.model);
        let answer: GenerateContentResponse = self
            .requests()?
            .request_json(
                ctx,
                &self.retry,
                self.name(),
                &Endpoint::new(format!("models/{model}:generateContent")),
                body,
                options,
            )
            .await?;

        let mut response = answer.into_response()?;
        if response.model.is_empty() {
            response.model = model.to_string();
        }
        finish_response(response, options)
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<EventStream, RequestError> {
        let body = self.encode(options)?;
        let model = options.model_or(&self.model);
        self.requests()?
            .request_stream(
                ctx,
                self.name(),
                &Endpoint::new(format!("models/{model}:streamGenerateContent"))
                    .with_query_param("alt", "sse"),
                body,
                options,
                CandidateDecoder::new(model),
            )
            .await
    }
}

impl fmt::Debug for Gemini {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gemini")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
