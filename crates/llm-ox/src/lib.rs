#![cfg_attr(not(test), deny(unsafe_code))]
#![warn(
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::missing_docs_in_private_items
)]
#![allow(async_fn_in_trait)]

//! Vendor-neutral protocol layer for LLM backends.
//!
//! Every provider crate turns its own REST/SSE dialect into the canonical
//! [`Event`] sequence defined here and folds complete answers into a
//! [`Response`]. The stream loop, block bookkeeping, prefill handling,
//! accumulation and retry policy are shared; a provider only supplies a
//! [`ChunkDecoder`] and its request encoding.

pub mod accumulator;
pub mod content;
pub mod context;
pub mod decoder;
pub mod error;
pub mod event;
pub mod event_stream;
pub mod hooks;
pub mod message;
pub mod options;
pub mod prelude;
pub mod provider;
pub mod request_builder;
pub mod response;
pub mod retry;
pub mod streaming;
pub mod usage;

pub use accumulator::ResponseAccumulator;
pub use content::Content;
pub use context::RequestContext;
pub use decoder::{ChunkDecoder, StreamState};
pub use error::{AccumulateError, ErrorKind, RequestError};
pub use event::{ContentBlock, Delta, Event, EventKind};
pub use event_stream::EventStream;
pub use hooks::{Hook, Hooks};
pub use message::{Message, Role};
pub use options::{GenerateOptions, ToolChoice, ToolDefinition};
pub use provider::Provider;
pub use request_builder::{AuthMethod, Endpoint, RequestBuilder, RequestConfig};
pub use response::{Response, StopReason};
pub use retry::RetryPolicy;
pub use streaming::SseParser;
pub use usage::Usage;

/// Re-export common types for convenience
pub use futures_util::stream::BoxStream;
