use thiserror::Error;

/// Boxed error returned by a [`Hook`](crate::hooks::Hook).
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Categorizes errors for retry logic and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 429 - retried with backoff
    RateLimit,
    /// HTTP 5xx - retried with backoff
    Server,
    /// Authentication/authorization issues
    Auth,
    /// Any other 4xx or a request rejected before sending
    InvalidRequest,
    /// Connection or read failures
    Network,
    /// Undecodable bodies and stream protocol violations
    Protocol,
    /// The request context was cancelled or its deadline passed
    Cancelled,
    /// A hook refused to continue
    Hook,
}

/// Errors raised while folding events into a [`Response`](crate::Response).
#[derive(Debug, Error)]
pub enum AccumulateError {
    #[error("content block {0} was started twice")]
    DuplicateBlock(usize),

    #[error("content block {0} was never started")]
    UnknownBlock(usize),

    #[error("content block {0} is already stopped")]
    BlockStopped(usize),

    #[error("delta of kind {delta} does not fit content block {index}")]
    DeltaMismatch { index: usize, delta: &'static str },

    #[error("tool input for content block {index} is not valid JSON: {source}")]
    MalformedToolInput {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("event received after message_stop")]
    AfterComplete,
}

#[derive(Debug, Error)]
pub enum RequestError {
    /// Errors from the HTTP client
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// Reading the body failed below the HTTP client
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// Non-2xx answer from the vendor
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        error_type: Option<String>,
    },

    /// An `error` frame inside an otherwise healthy stream
    #[error("stream error ({error_type}): {message}")]
    Stream { error_type: String, message: String },

    #[error("vendor returned no choices or content")]
    EmptyResponse,

    #[error("unexpected response from API: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Accumulate(#[from] AccumulateError),

    #[error("stream ended before message_stop")]
    IncompleteStream,

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("hook aborted the call: {0}")]
    Hook(#[source] HookError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no API key configured")]
    MissingApiKey,
}

impl RequestError {
    /// Returns the error kind for categorizing errors in retry logic
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { status, .. } => match *status {
                429 => ErrorKind::RateLimit,
                500..=599 => ErrorKind::Server,
                401 | 403 => ErrorKind::Auth,
                _ => ErrorKind::InvalidRequest,
            },
            Self::Reqwest(e) if e.is_decode() => ErrorKind::Protocol,
            Self::Reqwest(_) | Self::Io(_) => ErrorKind::Network,
            Self::Serde(_)
            | Self::Stream { .. }
            | Self::EmptyResponse
            | Self::UnexpectedResponse(_)
            | Self::Accumulate(_)
            | Self::IncompleteStream => ErrorKind::Protocol,
            Self::Cancelled | Self::DeadlineExceeded => ErrorKind::Cancelled,
            Self::Hook(_) => ErrorKind::Hook,
            Self::InvalidRequest(_) | Self::MissingApiKey => ErrorKind::InvalidRequest,
        }
    }

    /// Only HTTP 429 and 5xx answers are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimit | ErrorKind::Server)
    }

    /// HTTP status carried by an [`RequestError::Api`] error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Parse error response from HTTP status and body
pub fn parse_error_response(status: reqwest::StatusCode, body: &bytes::Bytes) -> RequestError {
    let (message, error_type) = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| extract_error(&json))
        .unwrap_or_else(|| (String::from_utf8_lossy(body).into_owned(), None));

    RequestError::Api {
        status: status.as_u16(),
        message,
        error_type,
    }
}

/// Pulls message and type out of the `{"error": {...}}` envelopes vendors use.
fn extract_error(json: &serde_json::Value) -> Option<(String, Option<String>)> {
    // OpenAI/Anthropic/Gemini all nest under "error"; Ollama sometimes sends a bare string.
    match json.get("error") {
        Some(serde_json::Value::String(message)) => return Some((message.clone(), None)),
        Some(error) => {
            if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
                let error_type = error
                    .get("type")
                    .or_else(|| error.get("status"))
                    .and_then(|t| t.as_str())
                    .map(str::to_string);
                return Some((message.to_string(), error_type));
            }
        }
        None => {}
    }

    json.get("message")
        .and_then(|m| m.as_str())
        .map(|m| (m.to_string(), None))
}
