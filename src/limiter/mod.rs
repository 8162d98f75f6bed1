//! The four admission algorithms sharing one `take`/`wait` contract.
//!
//! [`counter`], [`token_bucket`] and [`leaky_bucket`] are remote
//! variants: they evaluate a script on the shared store and cache the
//! result locally. [`sliding_window`] is process-local and never talks
//! to a store at all.

use std::time::Duration;

use crate::error::{Error, Result};

pub mod counter;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

pub use counter::CounterLimiter;
pub use leaky_bucket::LeakyBucketLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Validates the configuration shared by every remote limiter variant.
pub(crate) fn validate(duration: Duration, throughput: i64, batch_size: i64) -> Result<()> {
    if duration < Duration::from_millis(1) {
        return Err(Error::Config(format!(
            "duration must be at least 1ms, got {duration:?}"
        )));
    }
    if throughput <= 0 {
        return Err(Error::Config(format!(
            "throughput must be positive, got {throughput}"
        )));
    }
    if batch_size <= 0 {
        return Err(Error::Config(format!(
            "batch_size must be positive, got {batch_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sub_millisecond_duration() {
        assert!(validate(Duration::from_micros(999), 1, 1).is_err());
    }

    #[test]
    fn rejects_non_positive_throughput() {
        assert!(validate(Duration::from_secs(1), 0, 1).is_err());
        assert!(validate(Duration::from_secs(1), -1, 1).is_err());
    }

    #[test]
    fn rejects_non_positive_batch_size() {
        assert!(validate(Duration::from_secs(1), 1, 0).is_err());
        assert!(validate(Duration::from_secs(1), 1, -1).is_err());
    }

    #[test]
    fn accepts_minimal_valid_config() {
        assert!(validate(Duration::from_millis(1), 1, 1).is_ok());
    }

    proptest::proptest! {
        /// Any duration of at least 1ms with positive throughput and
        /// batch_size validates; anything outside those bounds doesn't.
        #[test]
        fn validate_matches_its_own_boundary_conditions(
            duration_ms in 0u64..10,
            throughput in -2i64..3,
            batch_size in -2i64..3,
        ) {
            let duration = Duration::from_millis(duration_ms);
            let result = validate(duration, throughput, batch_size);
            let expected_ok = duration_ms >= 1 && throughput > 0 && batch_size > 0;
            prop_assert_eq!(result.is_ok(), expected_ok);
        }
    }
}
