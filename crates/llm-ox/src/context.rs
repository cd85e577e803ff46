use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RequestError;

/// Cancellation and deadline for one call.
///
/// Cloning shares the cancellation token, so cancelling any clone
/// cancels them all.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The error the context currently imposes, if any.
    #[must_use]
    pub fn check(&self) -> Option<RequestError> {
        if self.token.is_cancelled() {
            Some(RequestError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(RequestError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> RequestError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => RequestError::Cancelled,
                () = tokio::time::sleep_until(deadline) => RequestError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                RequestError::Cancelled
            }
        }
    }

    /// Runs `fut` unless the context ends first.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or `Cancelled`/`DeadlineExceeded`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, RequestError>
    where
        F: Future<Output = Result<T, RequestError>>,
    {
        if let Some(err) = self.check() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }
}
