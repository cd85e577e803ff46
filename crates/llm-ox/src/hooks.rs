use std::{fmt, sync::Arc};

use crate::{error::HookError, event::Event, message::Message, response::Response};

/// What a [`Hook`] sees before a request goes out.
#[derive(Debug, Clone, Copy)]
pub struct RequestHookContext<'a> {
    pub provider: &'a str,
    pub messages: &'a [Message],
    /// The serialized vendor body, exactly as it will be sent.
    pub body: &'a [u8],
    pub streaming: bool,
}

/// Observation points around a call.
///
/// Hooks cannot change what is sent or received. Returning an error
/// aborts the call with [`RequestError::Hook`](crate::RequestError::Hook).
pub trait Hook: Send + Sync {
    /// # Errors
    ///
    /// Any error aborts the call before the request is sent.
    fn before_request(&self, _ctx: &RequestHookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Any error replaces the decoded response.
    fn after_response(&self, _response: &Response) -> Result<(), HookError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Any error ends the stream.
    fn after_event(&self, _event: &Event) -> Result<(), HookError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct Hooks(Vec<Arc<dyn Hook>>);

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, hook: impl Hook + 'static) -> Self {
        self.0.push(Arc::new(hook));
        self
    }

    pub fn push(&mut self, hook: Arc<dyn Hook>) {
        self.0.push(hook);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn before_request(&self, ctx: &RequestHookContext<'_>) -> Result<(), HookError> {
        self.0.iter().try_for_each(|h| h.before_request(ctx))
    }

    pub fn after_response(&self, response: &Response) -> Result<(), HookError> {
        self.0.iter().try_for_each(|h| h.after_response(response))
    }

    pub fn after_event(&self, event: &Event) -> Result<(), HookError> {
        self.0.iter().try_for_each(|h| h.after_event(event))
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hooks").field(&self.0.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl Hook for Counting {
        fn after_event(&self, _event: &Event) -> Result<(), HookError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Refuse;

    impl Hook for Refuse {
        fn after_event(&self, _event: &Event) -> Result<(), HookError> {
            Err("refused".into())
        }
    }

    #[test]
    fn first_error_stops_later_hooks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let hooks = Hooks::new()
            .with(Counting(seen.clone()))
            .with(Refuse)
            .with(Counting(seen.clone()));

        let err = hooks
            .after_event(&Event::MessageStop { response: None })
            .unwrap_err();
        assert_eq!(err.to_string(), "refused");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
