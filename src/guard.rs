//! The anti-amplification guard: a local, deterministic rate limiter that
//! caps how often a single limiter instance can call into the store,
//! independent of how many callers are hammering `take` locally.
//!
//! Implemented as a classical token bucket over atomics, in the style of
//! the fixed-window and token-bucket limiters it sits alongside — lock-free,
//! CAS-based refill, no background task.

use std::sync::atomic::{AtomicU64, Ordering::*};

const MICROS_PER_SEC: u64 = 1_000_000;

/// Caps remote-call frequency at `2x` a configured rate, independent of
/// local caller pressure.
#[derive(Debug)]
pub struct AntiDdosGuard {
    /// Tokens currently available, fixed-point scaled: one whole token is
    /// `MICROS_PER_SEC` units, matching the microsecond clock so refill
    /// arithmetic needs no floating point on the hot path.
    tokens_scaled: AtomicU64,
    last_refill_us: AtomicU64,
    /// Tokens/sec, scaled by `MICROS_PER_SEC` and divided back out per
    /// elapsed microsecond: refill over `elapsed_us` is simply
    /// `elapsed_us * rate_per_sec`.
    rate_per_sec: u64,
    capacity_scaled: u64,
}

impl AntiDdosGuard {
    /// Builds a guard admitting up to `2 * rate_per_sec` operations per
    /// second, with a burst allowance of `2 * burst`.
    pub fn new(rate_per_sec: f64, burst: u64, now_us: u64) -> Self {
        let rate_per_sec = (rate_per_sec * 2.0).max(0.0) as u64;
        let burst = burst.saturating_mul(2).max(1);
        let capacity_scaled = burst * MICROS_PER_SEC;
        Self {
            tokens_scaled: AtomicU64::new(capacity_scaled),
            last_refill_us: AtomicU64::new(now_us),
            rate_per_sec,
            capacity_scaled,
        }
    }

    /// Attempts to admit one operation at time `now_us` (microseconds).
    pub fn allow(&self, now_us: u64) -> bool {
        let mut current = self.tokens_scaled.load(Relaxed);
        loop {
            let last = self.last_refill_us.swap(now_us, AcqRel);
            let elapsed_us = now_us.saturating_sub(last);
            let refill = elapsed_us.saturating_mul(self.rate_per_sec);
            let refreshed = current.saturating_add(refill).min(self.capacity_scaled);

            if refreshed < MICROS_PER_SEC {
                // Less than one whole token available.
                let _ = self.tokens_scaled.compare_exchange(current, refreshed, AcqRel, Relaxed);
                return false;
            }

            let spent = refreshed - MICROS_PER_SEC;
            match self.tokens_scaled.compare_exchange(current, spent, AcqRel, Relaxed) {
                Ok(_) => return true,
                Err(next) => current = next,
            }
        }
    }
}
