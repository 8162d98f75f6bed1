//! The `wait` state machine: turns a non-blocking `take` into a bounded,
//! cancellable poll loop.
//!
//! States, per call:
//!
//! 1. **Try** — call `take`. Success terminates immediately; an error
//!    propagates unchanged.
//! 2. **Feasibility** — if the caller gave a deadline and less than one
//!    `interval` remains before it, give up rather than poll uselessly.
//! 3. **Poll** — sleep for `interval`, racing the cancellation token if
//!    one was supplied, then go back to **Try**.

use std::future::Future;
use std::time::Instant;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Drives `take` until it admits, the deadline becomes infeasible, or the
/// cancellation token fires.
///
/// `interval` is the limiter's natural poll period — the finest
/// granularity at which new capacity can appear.
pub(crate) async fn wait_for<F, Fut>(
    interval: Duration,
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
    mut take: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        if take().await? {
            return Ok(());
        }

        let now = Instant::now();
        if let Some(deadline) = deadline {
            if deadline < now + interval {
                return Err(Error::DeadlineInfeasible { deadline });
            }
        }

        match &cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            None => tokio::time::sleep(interval).await,
        }
    }
}
