use std::future::Future;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::BackendError;
use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, doubling the delay between attempts.
///
/// - each attempt is bounded by `policy.timeout_ms`
/// - `token` is checked before every attempt and during every backoff
///   sleep; an attempt in flight always completes or times out first
/// - a notification on `rearm` skips the pending sleep and restarts the
///   backoff from its base delay
///
/// Returns `Ok(None)` when cancelled and
/// `Err(BackendError::RetriesExhausted)` once `policy.max_retries` attempts
/// (0 = unlimited) have failed.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    token: &CancellationToken,
    rearm: Option<&Notify>,
    task: F,
    policy: BackoffPolicy,
) -> Result<Option<P>>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut attempts = 0usize;
    let mut backoff_step = 0usize;
    loop {
        if token.is_cancelled() {
            return Ok(None);
        }

        match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(Some(r)),
            Ok(Err(e)) => {
                warn!(attempt = attempts + 1, "task failed with error: {:?}", e);
            }
            Err(_) => {
                let e: Error = BackendError::Timeout(policy.timeout()).into();
                warn!(attempt = attempts + 1, "task timed out: {:?}", e);
            }
        }

        attempts += 1;
        if policy.max_retries != 0 && attempts >= policy.max_retries {
            error!("Task failed after {} attempts", attempts);
            return Err(BackendError::RetriesExhausted { attempts }.into());
        }

        let delay = policy.delay_for(backoff_step);
        backoff_step += 1;
        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(None),
            _ = wait_rearm(rearm) => {
                debug!("backoff interrupted by rearm");
                backoff_step = 0;
            }
            _ = sleep(delay) => {}
        }
    }
}

async fn wait_rearm(rearm: Option<&Notify>) {
    match rearm {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

/// Spawns a named task whose error is logged rather than propagated.
pub(crate) fn spawn_task<Fut>(
    name: &str,
    fut: Fut,
) -> JoinHandle<()>
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
