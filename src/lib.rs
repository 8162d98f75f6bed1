//! Distributed rate limiting backed by a shared Redis-compatible store.
//!
//! Four admission algorithms — fixed-window counter, token bucket, leaky
//! bucket, and a process-local sliding window — share one public
//! contract: [`Limiter::take`] is a non-blocking admission check,
//! [`Limiter::wait`] turns repeated denials into a bounded, cancellable
//! poll loop.
//!
//! The three remote variants coordinate through a shared store (see
//! [`store::Store`]) via a small, content-hashed Lua script registry
//! (see [`scripts`]); each process also keeps a local token cache, an
//! anti-amplification guard, and a single-flight coalescer so that a
//! fleet of cooperating processes converges on the configured rate
//! without every caller round-tripping to the store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ratelimit::{Limiter, LimiterOptions, store::RedisStore};
//!
//! # async fn run() -> ratelimit::Result<()> {
//! let store = Arc::new(RedisStore::connect("redis://127.0.0.1/").await?);
//! let limiter = Limiter::counter(
//!     store,
//!     "api:acme-corp",
//!     Duration::from_secs(1),
//!     100,
//!     10,
//!     LimiterOptions::default(),
//! )
//! .await?;
//!
//! if limiter.take().await? {
//!     // admitted, proceed
//! }
//! # Ok(())
//! # }
//! ```

mod guard;
mod local_cache;
pub mod limiter;
mod prefetch;
pub mod scripts;
mod single_flight;
pub mod store;
mod time;
mod wait;

pub mod error;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

pub use error::{Error, Result};
pub use limiter::{CounterLimiter, LeakyBucketLimiter, SlidingWindowLimiter, TokenBucketLimiter};
pub use store::Store;
pub use time::{SystemTimeSource, TimeSource};

/// Construction options recognized by every remote limiter factory.
///
/// Defaults match the reference semantics: anti-DDoS guarding on,
/// prefetching off. Prefetching only has an effect on
/// [`Limiter::token_bucket`] — other variants silently ignore it.
#[derive(Debug, Clone, Copy)]
pub struct LimiterOptions {
    anti_ddos: bool,
    enable_prefetch: bool,
    prefetch_count: i64,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            anti_ddos: true,
            enable_prefetch: false,
            prefetch_count: 5,
        }
    }
}

impl LimiterOptions {
    /// Enables or disables the local anti-DDoS guard. Enabled by default.
    pub fn anti_ddos(mut self, enabled: bool) -> Self {
        self.anti_ddos = enabled;
        self
    }

    /// Enables the background prefetcher (token bucket only).
    pub fn enable_prefetch(mut self, enabled: bool) -> Self {
        self.enable_prefetch = enabled;
        self
    }

    /// Sets the prefetch low-water mark: the cache is topped up whenever
    /// it drops below this count. Only meaningful alongside
    /// [`LimiterOptions::enable_prefetch`].
    pub fn prefetch_count(mut self, count: i64) -> Self {
        self.prefetch_count = count;
        self
    }
}

/// The public façade: one type for all four admission algorithms.
///
/// A tagged enum rather than a trait object — the variants don't share
/// a vtable-friendly shape (sliding window is sync and storeless, the
/// others are async and store-backed), and callers generally know which
/// algorithm they asked for. `Limiter` is `Send + Sync`; share it behind
/// an [`Arc`] across tasks the way its constructors' `store` parameter
/// is already shared.
pub enum Limiter {
    /// Fixed-window counter, see [`CounterLimiter`].
    Counter(CounterLimiter),
    /// Token bucket, see [`TokenBucketLimiter`].
    TokenBucket(TokenBucketLimiter),
    /// Leaky bucket, see [`LeakyBucketLimiter`].
    LeakyBucket(LeakyBucketLimiter),
    /// Process-local sliding window, see [`SlidingWindowLimiter`].
    SlidingWindow(SlidingWindowLimiter),
}

impl Limiter {
    /// Builds a fixed-window counter limiter.
    ///
    /// `duration`/`throughput` define the window size and its quota;
    /// `batch_size` caps how many tokens one remote call may grant.
    pub async fn counter(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        batch_size: i64,
        options: LimiterOptions,
    ) -> Result<Self> {
        let limiter =
            CounterLimiter::new(store, key, duration, throughput, batch_size, options.anti_ddos)
                .await?;
        Ok(Self::Counter(limiter))
    }

    /// Builds a token bucket limiter.
    ///
    /// `max_capacity` caps how many tokens the remote bucket may accrue;
    /// `batch_size` caps how many tokens one remote call may grant.
    #[allow(clippy::too_many_arguments)]
    pub async fn token_bucket(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        max_capacity: i64,
        batch_size: i64,
        options: LimiterOptions,
    ) -> Result<Self> {
        let limiter = TokenBucketLimiter::new(
            store,
            key,
            duration,
            throughput,
            max_capacity,
            batch_size,
            options.anti_ddos,
            options.enable_prefetch,
            options.prefetch_count,
        )
        .await?;
        Ok(Self::TokenBucket(limiter))
    }

    /// Builds a leaky bucket limiter. Admissions are spaced at least
    /// `duration / throughput` apart, enforced by the store's clock.
    pub async fn leaky_bucket(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        options: LimiterOptions,
    ) -> Result<Self> {
        let limiter =
            LeakyBucketLimiter::new(store, key, duration, throughput, options.anti_ddos).await?;
        Ok(Self::LeakyBucket(limiter))
    }

    /// Builds a process-local sliding window limiter. Infallible — there
    /// is no store to reach, and no options apply.
    pub fn sliding_window(throughput: i64, duration: Duration, window_buckets: usize) -> Self {
        Self::SlidingWindow(SlidingWindowLimiter::new(throughput, duration, window_buckets))
    }

    /// The limiter's natural poll period: the finest granularity at
    /// which new capacity can appear, used as [`Limiter::wait`]'s
    /// sleep interval and feasibility bound.
    fn interval(&self) -> Duration {
        match self {
            Self::Counter(l) => l.interval(),
            Self::TokenBucket(l) => l.interval(),
            Self::LeakyBucket(l) => l.interval(),
            Self::SlidingWindow(l) => l.interval(),
        }
    }

    /// Attempts to admit one operation without blocking.
    ///
    /// Returns `Ok(false)` for any denial (guard, empty cache, or a
    /// script-returned zero) — denial is not an error. Errors surface
    /// only store failures; no local state changes when the store call
    /// fails.
    pub async fn take(&self) -> Result<bool> {
        match self {
            Self::Counter(l) => l.take().await,
            Self::TokenBucket(l) => l.take().await,
            Self::LeakyBucket(l) => l.take().await,
            Self::SlidingWindow(l) => l.take().await,
        }
    }

    /// Blocks (asynchronously) until admitted, `cancel` fires, or
    /// `deadline` can no longer be honored.
    ///
    /// Polls at [`Limiter::interval`]; never decrements any internal
    /// counter itself — all admission still goes through `take`.
    pub async fn wait(
        &self,
        deadline: Option<Instant>,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        wait::wait_for(self.interval(), deadline, cancel, || self.take()).await
    }
}
