//! Bounded fan-out over proxies and the per-proxy retry loop

use crate::proxy::models::{CheckResult, Proxy};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

/// Run `attempt` up to `retries` times (at least once), one after the other,
/// stopping at the first alive result.
///
/// The returned result is the alive attempt's own snapshot, so its latency is
/// that attempt's latency. If nothing succeeds the last attempt is returned
/// with `alive = false`. An attempt exceeding `attempt_timeout` counts as a
/// failed attempt.
pub async fn retry_until_alive<F, Fut>(
    proxy: &Proxy,
    retries: usize,
    attempt_timeout: Duration,
    mut attempt: F,
) -> CheckResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CheckResult>,
{
    let retries = retries.max(1);
    let mut attempt_no = 1;

    loop {
        let mut result = match timeout(attempt_timeout, attempt()).await {
            Ok(result) => result,
            Err(_) => CheckResult::timeout(proxy.clone()),
        };

        debug!(
            proxy = %proxy.key(),
            attempt = attempt_no,
            retries,
            alive = result.alive,
            error = result.error.as_deref().unwrap_or(""),
            "attempt finished"
        );

        if result.alive {
            return result;
        }
        if attempt_no >= retries {
            result.alive = false;
            return result;
        }
        attempt_no += 1;
    }
}

/// Run `check` once per proxy with at most `concurrency` checks in flight and
/// wait for all of them. Exactly one result comes back per input proxy; a
/// check task that dies is reported as a failed result for its proxy.
pub async fn run_bounded<F, Fut>(
    proxies: Vec<Proxy>,
    concurrency: usize,
    check: F,
) -> Vec<CheckResult>
where
    F: Fn(Proxy) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CheckResult> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let check = Arc::new(check);

    let handles: Vec<_> = proxies
        .iter()
        .cloned()
        .map(|proxy| {
            let sem = Arc::clone(&semaphore);
            let check = Arc::clone(&check);
            tokio::spawn(async move {
                // Held until the check completes, whatever its outcome.
                let _permit = sem.acquire_owned().await?;
                Ok::<_, tokio::sync::AcquireError>((*check)(proxy).await)
            })
        })
        .collect();

    let joined = join_all(handles).await;

    proxies
        .into_iter()
        .zip(joined)
        .map(|(proxy, joined)| match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CheckResult::failed(proxy, format!("task_failed: {}", e)),
            Err(e) => CheckResult::failed(proxy, format!("task_failed: {}", e)),
        })
        .collect()
}
