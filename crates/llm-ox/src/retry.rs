use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use bon::Builder;
use tracing::warn;

use crate::{context::RequestContext, error::RequestError};

pub const DEFAULT_MAX_RETRIES: usize = 6;
pub const DEFAULT_BASE_WAIT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Bounded exponential backoff for the non-streaming round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub max_retries: usize,
    #[builder(default = DEFAULT_BASE_WAIT)]
    pub base_wait: Duration,
    #[builder(default = DEFAULT_MAX_WAIT)]
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self::builder().max_retries(0).build()
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_wait)
            .with_max_delay(self.max_wait.max(self.base_wait))
            .with_factor(2.0)
            .with_max_times(self.max_retries)
    }

    /// Runs `attempt`, retrying HTTP 429 and 5xx failures with backoff.
    ///
    /// Any other error is returned immediately. Once retries are exhausted
    /// the last error is returned as is. Cancellation or the deadline of
    /// `ctx` ends the loop at once, including mid-backoff.
    ///
    /// # Errors
    ///
    /// The final error of `attempt`, or `Cancelled`/`DeadlineExceeded`.
    pub async fn run<T, F, Fut>(&self, ctx: &RequestContext, attempt: F) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let retrying = attempt
            .retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(RequestError::is_retryable)
            .notify(|err: &RequestError, wait: Duration| {
                if err.status() == Some(429) {
                    warn!(?wait, "rate limit exceeded, backing off");
                } else {
                    warn!(error = %err, ?wait, "retryable request failure, backing off");
                }
            });

        ctx.run(retrying).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn api_error(status: u16) -> RequestError {
        RequestError::Api {
            status,
            message: format!("status {status}"),
            error_type: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pure_rate_limit_is_retried_exactly_max_retries_times() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::builder().max_retries(3).build();

        let counter = attempts.clone();
        let res: Result<(), _> = policy
            .run(&RequestContext::new(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(429))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(res.unwrap_err().status(), Some(429));
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let res: Result<(), _> = RetryPolicy::default()
            .run(&RequestContext::new(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(400))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(res.unwrap_err().status(), Some(400));
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_then_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let res = RetryPolicy::default()
            .run(&RequestContext::new(), || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(api_error(503))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(res.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_wins_over_backoff() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(5));
        let policy = RetryPolicy::builder()
            .base_wait(Duration::from_secs(60))
            .build();

        let res: Result<(), _> = policy
            .run(&ctx, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(429))
                }
            })
            .await;

        assert!(matches!(res, Err(RequestError::DeadlineExceeded)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_mid_backoff() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let res: Result<(), _> = RetryPolicy::default()
            .run(&ctx, || async { Err(api_error(500)) })
            .await;

        assert!(matches!(res, Err(RequestError::Cancelled)));
    }
}
