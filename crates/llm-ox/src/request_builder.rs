use bytes::Bytes;
use reqwest::RequestBuilder as ReqwestRequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

#[cfg(feature = "leaky-bucket")]
use leaky_bucket::RateLimiter;
#[cfg(feature = "leaky-bucket")]
use std::sync::Arc;

use crate::{
    context::RequestContext,
    decoder::FrameDecoder,
    error::{self, RequestError},
    event_stream::EventStream,
    hooks::RequestHookContext,
    options::{GenerateOptions, apply_prefill, merge_provider_options},
    response::Response,
    retry::RetryPolicy,
    streaming::SseParser,
};

/// Authentication method for API requests
#[derive(Clone)]
pub enum AuthMethod {
    /// Bearer token authentication (Authorization: Bearer <token>)
    Bearer(String),
    /// API key header (e.g., x-api-key: <key>)
    ApiKey { header_name: String, key: String },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Self::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("header_name", header_name)
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// A POST endpoint relative to the configured base URL
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub path: String,
    pub query_params: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query_params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }
}

/// Configuration for request building
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub base_url: String,
    pub auth: Option<AuthMethod>,
    pub default_headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
}

impl RequestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: None,
            default_headers: Vec::new(),
            user_agent: None,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// HTTP plumbing shared by every provider: auth, headers, hooks, retry
/// and stream opening.
pub struct RequestBuilder {
    client: reqwest::Client,
    config: RequestConfig,
    #[cfg(feature = "leaky-bucket")]
    limiter: Option<Arc<RateLimiter>>,
}

impl RequestBuilder {
    pub fn new(client: reqwest::Client, config: RequestConfig) -> Self {
        Self {
            client,
            config,
            #[cfg(feature = "leaky-bucket")]
            limiter: None,
        }
    }

    #[cfg(feature = "leaky-bucket")]
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Option<Arc<RateLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Build a reqwest `RequestBuilder` for the given endpoint
    pub fn build_request(
        &self,
        endpoint: &Endpoint,
        extra_headers: &[(String, String)],
    ) -> ReqwestRequestBuilder {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.path.trim_start_matches('/')
        );

        let mut req = self.client.post(&url);

        if !endpoint.query_params.is_empty() {
            req = req.query(&endpoint.query_params);
        }

        if let Some(ref auth) = self.config.auth {
            req = match auth {
                AuthMethod::Bearer(token) => req.bearer_auth(token),
                AuthMethod::ApiKey { header_name, key } => req.header(header_name, key),
            };
        }

        for (key, value) in self.config.default_headers.iter().chain(extra_headers) {
            req = req.header(key, value);
        }

        if let Some(ref user_agent) = self.config.user_agent {
            req = req.header("user-agent", user_agent);
        }

        req.header("content-type", "application/json")
    }

    async fn acquire(&self) {
        #[cfg(feature = "leaky-bucket")]
        if let Some(limiter) = &self.limiter {
            limiter.acquire_one().await;
        }
    }

    /// One round trip; returns the body of a 2xx answer.
    ///
    /// # Errors
    ///
    /// Transport failures, or the parsed vendor error for a non-2xx status.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        body: Bytes,
        extra_headers: &[(String, String)],
    ) -> Result<Bytes, RequestError> {
        self.acquire().await;
        let res = self
            .build_request(endpoint, extra_headers)
            .body(body)
            .send()
            .await?;

        let status = res.status();
        let bytes = res.bytes().await?;
        if status.is_success() {
            Ok(bytes)
        } else {
            debug!(status = status.as_u16(), path = %endpoint.path, "request failed");
            Err(error::parse_error_response(status, &bytes))
        }
    }

    /// Opens an SSE response; a non-2xx status fails here, before any event.
    ///
    /// # Errors
    ///
    /// Transport failures, or the parsed vendor error for a non-2xx status.
    pub async fn open_stream(
        &self,
        endpoint: &Endpoint,
        body: Bytes,
        extra_headers: &[(String, String)],
    ) -> Result<reqwest::Response, RequestError> {
        self.acquire().await;
        let res = self
            .build_request(endpoint, extra_headers)
            .header("accept", "text/event-stream")
            .header("cache-control", "no-cache")
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            Ok(res)
        } else {
            let bytes = res.bytes().await?;
            debug!(status = status.as_u16(), path = %endpoint.path, "stream open failed");
            Err(error::parse_error_response(status, &bytes))
        }
    }

    /// Serializes `body`, merges passthrough options and runs the
    /// `before_request` hooks.
    fn prepare(
        provider: &str,
        body: &mut Value,
        options: &GenerateOptions,
        streaming: bool,
    ) -> Result<Bytes, RequestError> {
        merge_provider_options(body, &options.provider_options);
        let bytes = Bytes::from(serde_json::to_vec(body)?);
        trace!(provider, streaming, body = %String::from_utf8_lossy(&bytes), "request body");

        options
            .hooks
            .before_request(&RequestHookContext {
                provider,
                messages: &options.messages,
                body: &bytes,
                streaming,
            })
            .map_err(RequestError::Hook)?;
        Ok(bytes)
    }

    /// Non-streaming call: one retried round trip decoded as `T`.
    ///
    /// # Errors
    ///
    /// Hook, transport, vendor or decoding errors; see [`RetryPolicy::run`].
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        retry: &RetryPolicy,
        provider: &str,
        endpoint: &Endpoint,
        mut body: Value,
        options: &GenerateOptions,
    ) -> Result<T, RequestError> {
        let bytes = Self::prepare(provider, &mut body, options, false)?;
        let raw = retry
            .run(ctx, || self.send(endpoint, bytes.clone(), &options.request_headers))
            .await?;

        serde_json::from_slice::<T>(&raw).map_err(|e| {
            RequestError::UnexpectedResponse(format!(
                "failed to decode JSON: {e}; body: {}",
                String::from_utf8_lossy(&raw)
            ))
        })
    }

    /// Streaming call: opens the body and wraps it in an [`EventStream`].
    ///
    /// Stream opening is never retried.
    ///
    /// # Errors
    ///
    /// Hook or transport errors, or the vendor error for a non-2xx status.
    pub async fn request_stream(
        &self,
        ctx: &RequestContext,
        provider: &str,
        endpoint: &Endpoint,
        mut body: Value,
        options: &GenerateOptions,
        decoder: impl FrameDecoder + 'static,
    ) -> Result<EventStream, RequestError> {
        let bytes = Self::prepare(provider, &mut body, options, true)?;
        let response = ctx
            .run(self.open_stream(endpoint, bytes, &options.request_headers))
            .await?;

        Ok(EventStream::new(
            SseParser::new(response),
            decoder,
            options.prefill().map(str::to_string),
            ctx.clone(),
            options.hooks.clone(),
        ))
    }
}

/// Applies prefill and the `after_response` hooks to a decoded response.
///
/// # Errors
///
/// `Hook` when a hook refuses the response.
pub fn finish_response(
    mut response: Response,
    options: &GenerateOptions,
) -> Result<Response, RequestError> {
    if let Some(prefill) = options.prefill() {
        apply_prefill(
            &mut response.content,
            prefill,
            options.prefill_closing_tag.as_deref(),
        );
    }
    options
        .hooks
        .after_response(&response)
        .map_err(RequestError::Hook)?;
    Ok(response)
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
