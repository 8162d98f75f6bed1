//! The prefetcher: a cooperative background task that tops up a token
//! bucket limiter's local cache ahead of demand.
//!
//! Only [`crate::limiter::TokenBucketLimiter`] uses this — it is the only
//! variant where keeping the cache warm meaningfully reduces how often
//! `take` has to block on a round-trip. The task polls every 10ms rather
//! than reacting to cache state directly; that fixed cadence is itself
//! the volume limiter; it does not also run the anti-DDoS guard.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns the prefetch loop, returning its handle.
///
/// `count` reports the cache's current token count; `refill` performs one
/// single-flight remote fetch-and-accumulate. The loop exits as soon as
/// `cancel` fires, so it never outlives the limiter that owns `cancel`.
pub(crate) fn spawn<C, R, Fut>(
    threshold: i64,
    count: C,
    refill: R,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    C: Fn() -> i64 + Send + 'static,
    R: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = crate::error::Result<()>> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            if count() < threshold {
                if let Err(err) = refill().await {
                    warn!(%err, "rate limiter prefetch failed, will retry next tick");
                }
            }
        }
    })
}
