//! A pluggable clock, so algorithm logic can be tested deterministically
//! instead of racing the system clock.

use std::sync::OnceLock;
use std::time::Instant;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Supplies the current time to rate limiter internals.
///
/// Remote admission scripts always use the store's own clock (`TIME`);
/// this trait only drives the local, process-side pieces: the
/// anti-amplification guard, the sliding window, and the `wait` poll loop.
pub trait TimeSource: Send + Sync {
    /// Current time, in microseconds, relative to an arbitrary but
    /// monotonically increasing origin.
    fn now_micros(&self) -> u64;

    /// Current time, in whole seconds.
    fn now_secs(&self) -> u64 {
        self.now_micros() / MICROS_PER_SEC
    }
}

/// Wall-clock time source backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_micros(&self) -> u64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = *ORIGIN.get_or_init(Instant::now);
        Instant::now().duration_since(origin).as_micros() as u64
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::TimeSource;
    use std::sync::{Arc, Mutex};

    /// A deterministic, manually-advanced clock for tests.
    #[derive(Clone)]
    pub(crate) struct MockTimeSource {
        now_us: Arc<Mutex<u64>>,
    }

    impl MockTimeSource {
        pub(crate) fn new(start_us: u64) -> Self {
            Self {
                now_us: Arc::new(Mutex::new(start_us)),
            }
        }

        pub(crate) fn advance_micros(&self, micros: u64) {
            *self.now_us.lock().unwrap() += micros;
        }

        pub(crate) fn advance_secs(&self, secs: u64) {
            self.advance_micros(secs * super::MICROS_PER_SEC);
        }
    }

    impl TimeSource for MockTimeSource {
        fn now_micros(&self) -> u64 {
            *self.now_us.lock().unwrap()
        }
    }
}
