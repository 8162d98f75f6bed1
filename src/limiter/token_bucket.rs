//! Distributed token bucket limiter.
//!
//! Identical in shape to [`CounterLimiter`](super::CounterLimiter) —
//! guard, local cache, single-flight, accumulate-on-grant — but the
//! remote bucket carries fractional refill debt across calls instead of
//! resetting every window, and it is the only variant the [prefetcher]
//! can run ahead of.
//!
//! [prefetcher]: crate::prefetch

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Result;
use crate::guard::AntiDdosGuard;
use crate::local_cache::TokenCache;
use crate::prefetch;
use crate::scripts::{self, Script};
use crate::single_flight::SingleFlight;
use crate::store::Store;
use crate::time::{SystemTimeSource, TimeSource};

struct Inner<T: TimeSource> {
    store: Arc<dyn Store>,
    script: Script,
    key: String,
    duration: Duration,
    throughput: i64,
    max_capacity: i64,
    batch_size: i64,
    interval: Duration,
    cache: TokenCache,
    guard: Option<AntiDdosGuard>,
    single_flight: SingleFlight,
    time_source: T,
}

impl<T: TimeSource> Inner<T> {
    async fn fetch_and_accumulate(&self) -> Result<()> {
        // Only the single-flight leader runs this closure; accumulating
        // here (rather than on the shared return value) keeps followers
        // from each crediting the same grant into the cache.
        self.single_flight
            .do_once(&self.key, || async {
                let grant = self
                    .store
                    .eval_sha(
                        self.script.sha1(),
                        &self.key,
                        &[
                            self.duration.as_micros() as i64,
                            self.throughput,
                            self.batch_size,
                            self.max_capacity,
                        ],
                    )
                    .await?;
                self.cache.accumulate(grant);
                Ok(grant)
            })
            .await?;
        Ok(())
    }
}

/// A distributed token bucket limiter.
///
/// Unlike [`CounterLimiter`](super::CounterLimiter), refill debt survives
/// across remote calls: a call that arrives before a whole token has
/// accrued leaves `update_time` untouched rather than discarding the
/// fractional progress, so a client polling faster than the refill rate
/// still converges on the configured throughput instead of starving.
pub struct TokenBucketLimiter<T: TimeSource = SystemTimeSource> {
    inner: Arc<Inner<T>>,
    prefetch_cancel: Option<CancellationToken>,
}

impl TokenBucketLimiter<SystemTimeSource> {
    /// Creates a token bucket limiter backed by `store`, pinging it and
    /// ensuring the token bucket script is loaded. Spawns the prefetcher
    /// when `enable_prefetch` is set.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        max_capacity: i64,
        batch_size: i64,
        anti_ddos: bool,
        enable_prefetch: bool,
        prefetch_count: i64,
    ) -> Result<Self> {
        Self::with_time_source(
            store,
            key,
            duration,
            throughput,
            max_capacity,
            batch_size,
            anti_ddos,
            enable_prefetch,
            prefetch_count,
            SystemTimeSource,
        )
        .await
    }
}

impl<T: TimeSource + Clone + Send + Sync + 'static> TokenBucketLimiter<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn with_time_source(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        max_capacity: i64,
        batch_size: i64,
        anti_ddos: bool,
        enable_prefetch: bool,
        prefetch_count: i64,
        time_source: T,
    ) -> Result<Self> {
        super::validate(duration, throughput, batch_size)?;
        store.ping().await?;

        let key = key.into();
        let script = scripts::token_bucket_script();
        scripts::ensure_loaded(store.as_ref(), script).await?;

        let interval = duration / throughput.max(1) as u32;
        let throughput_per_sec = throughput as f64 / duration.as_secs_f64();
        let guard = anti_ddos.then(|| {
            AntiDdosGuard::new(
                throughput_per_sec,
                max_capacity.max(1) as u64,
                time_source.now_micros(),
            )
        });

        debug!(
            %key, ?duration, throughput, max_capacity, batch_size, enable_prefetch,
            "token bucket limiter created"
        );

        let inner = Arc::new(Inner {
            store,
            script,
            key,
            duration,
            throughput,
            max_capacity,
            batch_size,
            interval,
            cache: TokenCache::new(),
            guard,
            single_flight: SingleFlight::new(),
            time_source,
        });

        let prefetch_cancel = if enable_prefetch {
            let cancel = CancellationToken::new();
            let spawn_inner = inner.clone();
            let refill_inner = inner.clone();
            prefetch::spawn(
                prefetch_count,
                move || spawn_inner.cache.count(),
                move || {
                    let refill_inner = refill_inner.clone();
                    async move { refill_inner.fetch_and_accumulate().await }
                },
                cancel.clone(),
            );
            Some(cancel)
        } else {
            None
        };

        Ok(Self {
            inner,
            prefetch_cancel,
        })
    }

    /// The minimum interval between admissions, used by the `wait` engine.
    pub(crate) fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Attempts to admit one operation without blocking.
    pub async fn take(&self) -> Result<bool> {
        let inner = &self.inner;

        if let Some(guard) = &inner.guard {
            if !guard.allow(inner.time_source.now_micros()) {
                trace!(key = %inner.key, "token bucket limiter: anti-ddos guard denied");
                return Ok(false);
            }
        }

        if inner.cache.try_take() {
            return Ok(true);
        }

        inner.fetch_and_accumulate().await?;
        Ok(inner.cache.try_take())
    }
}

impl<T: TimeSource> Drop for TokenBucketLimiter<T> {
    fn drop(&mut self) {
        if let Some(cancel) = &self.prefetch_cancel {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use crate::time::test_utils::MockTimeSource;

    fn mock_store_granting(value: i64) -> Arc<dyn Store> {
        let mut mock = MockStore::new();
        mock.expect_ping().returning(|| Ok(()));
        mock.expect_script_exists().returning(|_| Ok(true));
        mock.expect_eval_sha().returning(move |_, _, _| Ok(value));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn denies_when_script_grants_nothing() {
        let store = mock_store_granting(0);
        let limiter = TokenBucketLimiter::with_time_source(
            store,
            "k",
            Duration::from_secs(1),
            3,
            1,
            2,
            false,
            false,
            5,
            MockTimeSource::new(0),
        )
        .await
        .unwrap();

        assert!(!limiter.take().await.unwrap());
    }

    #[tokio::test]
    async fn admits_and_caches_grant() {
        let store = mock_store_granting(2);
        let limiter = TokenBucketLimiter::with_time_source(
            store,
            "k",
            Duration::from_secs(1),
            3,
            3,
            2,
            false,
            false,
            5,
            MockTimeSource::new(0),
        )
        .await
        .unwrap();

        assert!(limiter.take().await.unwrap());
        assert!(limiter.take().await.unwrap());
        assert!(!limiter.take().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn prefetcher_tops_up_cache_without_a_take_call() {
        let store = mock_store_granting(5);
        let limiter = TokenBucketLimiter::with_time_source(
            store,
            "k",
            Duration::from_secs(1),
            3,
            5,
            2,
            false,
            true,
            1,
            MockTimeSource::new(0),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(limiter.inner.cache.count() > 0);
    }

    #[tokio::test]
    async fn anti_ddos_guard_can_deny_before_store_is_consulted() {
        let mut mock = MockStore::new();
        mock.expect_ping().returning(|| Ok(()));
        mock.expect_script_exists().returning(|_| Ok(true));
        mock.expect_eval_sha().never();
        let store: Arc<dyn Store> = Arc::new(mock);

        let limiter = TokenBucketLimiter::with_time_source(
            store,
            "k",
            Duration::from_secs(1),
            1,
            1,
            1,
            true,
            false,
            5,
            MockTimeSource::new(0),
        )
        .await
        .unwrap();

        // throughput=1/s -> guard burst is 2*max_capacity=2; exhaust it.
        let _ = limiter.take().await;
        let _ = limiter.take().await;
        let denied = limiter.take().await.unwrap();
        assert!(!denied);
    }
}
