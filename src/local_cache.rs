//! The per-limiter local token cache.
//!
//! A single non-negative integer, `n`, representing tokens already
//! claimed from the remote authority but not yet consumed locally. Every
//! successful `take` decrements it by one; every successful remote grant
//! *accumulates* into it rather than replacing it, so that tokens claimed
//! by a concurrent fast-path consumer while a remote call was in flight
//! are never lost.

use std::sync::Mutex;

/// A mutex-protected, accumulate-only token count.
#[derive(Debug, Default)]
pub struct TokenCache {
    n: Mutex<i64>,
}

impl TokenCache {
    /// Starts with an empty cache.
    pub fn new() -> Self {
        Self { n: Mutex::new(0) }
    }

    /// Takes one token from the cache if available.
    pub fn try_take(&self) -> bool {
        let mut n = self.n.lock().unwrap();
        if *n > 0 {
            *n -= 1;
            true
        } else {
            false
        }
    }

    /// Adds `grant` tokens to the cache. Never replaces the existing
    /// count.
    pub fn accumulate(&self, grant: i64) {
        if grant <= 0 {
            return;
        }
        let mut n = self.n.lock().unwrap();
        *n += grant;
    }

    /// Current token count, for prefetch threshold checks.
    pub fn count(&self) -> i64 {
        *self.n.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_fails_when_empty() {
        let cache = TokenCache::new();
        assert!(!cache.try_take());
    }

    #[test]
    fn accumulate_then_take() {
        let cache = TokenCache::new();
        cache.accumulate(3);
        assert_eq!(cache.count(), 3);
        assert!(cache.try_take());
        assert!(cache.try_take());
        assert!(cache.try_take());
        assert!(!cache.try_take());
    }

    #[test]
    fn accumulate_does_not_replace() {
        let cache = TokenCache::new();
        cache.accumulate(2);
        assert!(cache.try_take());
        // one token consumed concurrently while a grant of 2 more arrives
        cache.accumulate(2);
        assert_eq!(cache.count(), 3);
    }

    #[test]
    fn accumulate_ignores_non_positive_grants() {
        let cache = TokenCache::new();
        cache.accumulate(0);
        cache.accumulate(-5);
        assert_eq!(cache.count(), 0);
    }
}
