//! A keyed single-flight coalescer.
//!
//! Rust has no `singleflight.Group` in the standard library. This builds
//! the same guarantee from a [`DashMap`] of in-flight entries plus a
//! broadcast channel: the first caller for a given key becomes the
//! leader and runs the future to completion; every other caller for the
//! same key observes the existing entry and simply awaits its result
//! instead of issuing a duplicate remote call.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::{Error, Result};

struct InFlight {
    tx: broadcast::Sender<Result<i64, String>>,
}

/// Coalesces concurrent calls for the same key into a single execution.
pub struct SingleFlight {
    inflight: DashMap<String, Arc<InFlight>>,
}

impl SingleFlight {
    /// Creates an empty coalescer.
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Runs `f` for `key`, coalescing concurrent callers.
    ///
    /// Only the caller that inserts the entry (the leader) actually
    /// invokes `f`; every other concurrent caller for the same key
    /// subscribes to the leader's broadcast and receives the same
    /// result, without invoking `f` itself.
    ///
    /// The leader's result (grant or error, stringified) is broadcast to
    /// every follower so none of them block forever waiting on a channel
    /// the leader never wrote to.
    pub async fn do_once<F, Fut>(&self, key: &str, f: F) -> Result<i64>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<i64>>,
    {
        // Subscribing happens in the same, non-awaiting step as observing
        // the occupied entry, while the shard's internal lock is held, so
        // a follower can never subscribe *after* the leader has already
        // broadcast and torn down the entry.
        enum Role {
            Leader(Arc<InFlight>),
            Follower(broadcast::Receiver<std::result::Result<i64, String>>),
        }
        let role = match self.inflight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Role::Follower(entry.get().tx.subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                let inflight = Arc::new(InFlight { tx });
                entry.insert(inflight.clone());
                Role::Leader(inflight)
            }
        };

        match role {
            Role::Leader(inflight) => {
                let result = f().await;
                self.inflight.remove(key);
                let broadcastable = result.as_ref().map(|&g| g).map_err(|e| e.to_string());
                let _ = inflight.tx.send(broadcastable);
                result
            }
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(Ok(grant)) => Ok(grant),
                Ok(Err(message)) => Err(Error::Store(follower_error(message))),
                Err(_) => Err(Error::Store(follower_error(
                    "single-flight leader dropped without a result".into(),
                ))),
            },
        }
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

/// Followers only ever see the leader's already-formatted error message;
/// wrapping it back into [`redis::RedisError`] keeps the public error
/// surface limited to [`Error::Store`] for all store-originated failures,
/// regardless of whether the caller was the leader or a follower.
fn follower_error(message: String) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::IoError, "rate limiter store error", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn only_one_caller_executes_the_future() {
        let sf = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.do_once("k", || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42)
                    }
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let sf = SingleFlight::new();
        let a = sf.do_once("a", || async { Ok(1) });
        let b = sf.do_once("b", || async { Ok(2) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }

    #[tokio::test]
    async fn leader_error_is_returned_to_leader() {
        let sf = SingleFlight::new();
        let result = sf
            .do_once("k", || async {
                Err(Error::Config("boom".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn key_can_be_reused_after_completion() {
        let sf = SingleFlight::new();
        assert_eq!(sf.do_once("k", || async { Ok(1) }).await.unwrap(), 1);
        assert_eq!(sf.do_once("k", || async { Ok(2) }).await.unwrap(), 2);
    }
}
