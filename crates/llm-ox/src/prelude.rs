pub use crate::{
    accumulator::ResponseAccumulator,
    content::{Content, MediaSource, ToolResultPayload},
    context::RequestContext,
    error::RequestError,
    event::{ContentBlock, Delta, Event, EventKind},
    event_stream::EventStream,
    hooks::{Hook, Hooks},
    message::{Message, Role},
    options::{GenerateOptions, ToolChoice, ToolDefinition},
    provider::Provider,
    response::{Response, StopReason},
    retry::RetryPolicy,
    usage::Usage,
};
