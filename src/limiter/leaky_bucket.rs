//! Distributed leaky bucket limiter.
//!
//! The only remote variant with no local cache: each admission decision
//! is a single 0/1 answer from the store, so there is nothing useful to
//! accumulate between calls. `take` still goes through the anti-DDoS
//! guard and the single-flight coalescer, since concurrent callers for
//! the same key racing the same millisecond would otherwise all hit the
//! store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::Result;
use crate::guard::AntiDdosGuard;
use crate::scripts::{self, Script};
use crate::single_flight::SingleFlight;
use crate::store::Store;
use crate::time::{SystemTimeSource, TimeSource};

/// A distributed leaky bucket limiter.
pub struct LeakyBucketLimiter<T: TimeSource = SystemTimeSource> {
    store: Arc<dyn Store>,
    script: Script,
    key: String,
    interval: Duration,
    guard: Option<AntiDdosGuard>,
    single_flight: SingleFlight,
    time_source: T,
}

impl LeakyBucketLimiter<SystemTimeSource> {
    /// Creates a leaky bucket limiter backed by `store`, pinging it and
    /// ensuring the leaky bucket script is loaded.
    pub async fn new(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        anti_ddos: bool,
    ) -> Result<Self> {
        Self::with_time_source(store, key, duration, throughput, anti_ddos, SystemTimeSource).await
    }
}

impl<T: TimeSource> LeakyBucketLimiter<T> {
    pub(crate) async fn with_time_source(
        store: Arc<dyn Store>,
        key: impl Into<String>,
        duration: Duration,
        throughput: i64,
        anti_ddos: bool,
        time_source: T,
    ) -> Result<Self> {
        // batch_size has no meaning for leaky bucket; validate against 1
        // so the shared duration/throughput checks still apply.
        super::validate(duration, throughput, 1)?;
        store.ping().await?;

        let key = key.into();
        let script = scripts::leaky_bucket_script();
        scripts::ensure_loaded(store.as_ref(), script).await?;

        let interval = duration / throughput.max(1) as u32;
        let throughput_per_sec = throughput as f64 / duration.as_secs_f64();
        let guard = anti_ddos.then(|| {
            AntiDdosGuard::new(throughput_per_sec, throughput as u64, time_source.now_micros())
        });

        debug!(%key, ?duration, throughput, "leaky bucket limiter created");

        Ok(Self {
            store,
            script,
            key,
            interval,
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
                trace!(key = %self.key, "leaky bucket limiter: anti-ddos guard denied");
                return Ok(false);
            }
        }

        let admitted = self
            .single_flight
            .do_once(&self.key, || async {
                self.store
                    .eval_sha(
                        self.script.sha1(),
                        &self.key,
                        &[self.interval.as_micros() as i64],
                    )
                    .await
            })
            .await?;

        Ok(admitted != 0)
    }
}
