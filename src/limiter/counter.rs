//! Fixed-window counter limiter.
//!
//! Each window is a fixed-size slice of wall-clock time; the remote
//! script grants up to `batch_size` tokens per call as long as the
//! window's running count stays under `throughput`. Locally, grants
//! accumulate into a [`TokenCache`] so bursts within a window don't all
//! pay the round-trip.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::Result;
use crate::guard::AntiDdosGuard;
use crate::local_cache::TokenCache;
use crate::scripts::{self, Script};
use crate::single_flight::SingleFlight;
use crate::store::Store;
use crate::time::{SystemTimeSource, TimeSource};

/// A distributed fixed-window counter limiter.
pub struct CounterLimiter<T: TimeSource = SystemTimeSource> {
    store: Arc<dyn Store>,
    script: Script,
    key: String,
    duration: Duration,
    throughput: i64,
    batch_size: i64,
    interval: Duration,
    cache: TokenCache,
    guard: Option<AntiDdosGuard>,
    single_flight: SingleFlight,
    time_source: T,
}

impl CounterLimiter<SystemTimeSource> {
    /// Creates a counter limiter backed by `store`, pinging it and
    /// ensuring the counter script is loaded.
    pub async fn new(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        batch_size: i64,
        anti_ddos: bool,
    ) -> Result<Self> {
        Self::with_time_source(
            store,
            key,
            duration,
            throughput,
            batch_size,
            anti_ddos,
            SystemTimeSource,
        )
        .await
    }
}

impl<T: TimeSource> CounterLimiter<T> {
    pub(crate) async fn with_time_source(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        batch_size: i64,
        anti_ddos: bool,
        time_source: T,
    ) -> Result<Self> {
        super::validate(duration, throughput, batch_size)?;
        store.ping().await?;

        let key = key.into();
        let script = scripts::counter_script();
        scripts::ensure_loaded(store.as_ref(), script).await?;

        let interval = duration / throughput.max(1) as u32;
        let throughput_per_sec = throughput as f64 / duration.as_secs_f64();
        let guard = anti_ddos.then(|| {
            AntiDdosGuard::new(throughput_per_sec, throughput as u64, time_source.now_micros())
        });

        debug!(%key, ?duration, throughput, batch_size, "counter limiter created");

        Ok(Self {
            store,
            script,
            key,
            duration,
            throughput,
            batch_size,
            interval,
            cache: TokenCache::new(),
            guard,
            single_flight: SingleFlight::new(),
            time_source,
        })
    }

    /// The minimum interval between admissions, used by the `wait` engine.
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Attempts to admit one operation without blocking.
    pub async fn take(&self) -> Result<bool> {
        if let Some(guard) = &self.guard {
            if !guard.allow(self.time_source.now_micros()) {
                trace!(key = %self.key, "counter limiter: anti-ddos guard denied");
                return Ok(false);
            }
        }

        if self.cache.try_take() {
            return Ok(true);
        }

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
                        ],
                    )
                    .await?;
                self.cache.accumulate(grant);
                Ok(grant)
            })
            .await?;

        Ok(self.cache.try_take())
    }
}
