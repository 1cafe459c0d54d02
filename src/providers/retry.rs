//! Rate-limit-aware retry policy for outbound provider calls.
//!
//! Three cases, per the sync core's contract with upstream APIs:
//! - server errors (5xx) and timeouts: retried up to a small fixed attempt
//!   count with a fixed delay
//! - rate limits (429): sleep the provider-supplied retry-after, retry once
//! - unauthorized (401): invoke the refresh hook once (providers without a
//!   refresh path pass none), then surface the terminal failure

use crate::error::SyncError;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Hook that force-refreshes credentials after a 401. Borrowed for the
/// duration of one retried call.
pub type RefreshHook<'a> =
    &'a (dyn Fn() -> BoxFuture<'static, Result<(), SyncError>> + Send + Sync);

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts for transient (5xx/timeout) failures.
    pub max_attempts: u32,
    /// Fixed delay between transient retries.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Runs `op` under the retry policy.
///
/// `op` must be re-invokable: it re-reads the current access token on every
/// attempt so a 401-triggered refresh takes effect on the next try.
pub async fn call_with_retries<T, F, Fut>(
    policy: RetryPolicy,
    refresh: Option<RefreshHook<'_>>,
    op: F,
) -> Result<T, SyncError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut transient_attempts: u32 = 1;
    let mut rate_limit_retried = false;
    let mut refreshed = false;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_transient() && transient_attempts < policy.max_attempts {
            transient_attempts += 1;
            debug!(
                attempt = transient_attempts,
                error = %err,
                "Transient upstream failure, retrying after fixed delay"
            );
            sleep(policy.retry_delay).await;
            continue;
        }

        if let SyncError::Upstream {
            status: 429,
            retry_after,
            ..
        } = &err
        {
            if !rate_limit_retried {
                rate_limit_retried = true;
                let backoff = retry_after.unwrap_or(policy.retry_delay);
                warn!(backoff_ms = backoff.as_millis() as u64, "Rate limited, retrying once");
                sleep(backoff).await;
                continue;
            }
        }

        if let SyncError::Upstream { status: 401, .. } = &err {
            if !refreshed {
                if let Some(refresh) = refresh {
                    refreshed = true;
                    debug!("Unauthorized response, attempting token refresh");
                    refresh().await?;
                    continue;
                }
            }
        }

        return Err(err);
    }
}
