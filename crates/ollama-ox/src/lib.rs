#![cfg_attr(not(test), deny(unsafe_code))]
#![warn(
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::missing_docs_in_private_items
)]

//! Ollama through its OpenAI-compatible `/v1` endpoint.

use bon::bon;
use llm_ox::{
    EventStream, GenerateOptions, Provider, RequestContext, RequestError, Response, RetryPolicy,
};
use openai_ox::{OpenAi, ToolCallIndexing};

const BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL: &str = "llama3.2";
/// Ollama ignores the key but the OpenAI layer refuses to send an empty one.
const PLACEHOLDER_KEY: &str = "ollama";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// A local or remote Ollama server.
///
/// Ollama sends each streamed tool call as one fragment, all with vendor
/// index 0, so calls are split per fragment instead of per index.
#[derive(Debug, Clone)]
pub struct Ollama {
    inner: OpenAi,
}

#[bon]
impl Ollama {
    #[builder]
    pub fn new(
        #[builder(default = PLACEHOLDER_KEY.to_string(), into)] api_key: String,
        #[builder(default = BASE_URL.to_string(), into)] base_url: String,
        #[builder(default = DEFAULT_MODEL.to_string(), into)] model: String,
        #[builder(default = DEFAULT_MAX_TOKENS)] max_tokens: u32,
        #[builder(default)] client: reqwest::Client,
        #[builder(default)] retry: RetryPolicy,
    ) -> Self {
        let inner = OpenAi::builder()
            .api_key(api_key)
            .base_url(base_url)
            .name(format!("ollama-{model}"))
            .model(model)
            .max_tokens(max_tokens)
            .client(client)
            .retry(retry)
            .system_role("system")
            .tool_call_indexing(ToolCallIndexing::PerDelta)
            .include_stream_usage(false)
            .build();
        Self { inner }
    }

    /// Reads `OLLAMA_API_KEY` and `OLLAMA_BASE_URL`, both optional.
    #[must_use]
    pub fn load_from_env() -> Self {
        let api_key =
            std::env::var("OLLAMA_API_KEY").unwrap_or_else(|_| PLACEHOLDER_KEY.to_string());
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| BASE_URL.to_string());
        Self::builder().api_key(api_key).base_url(base_url).build()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.inner.model()
    }
}

impl Default for Ollama {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Provider for Ollama {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<Response, RequestError> {
        self.inner.generate(ctx, options).await
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        options: &GenerateOptions,
    ) -> Result<EventStream, RequestError> {
        self.inner.stream(ctx, options).await
    }
}
