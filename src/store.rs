//! Abstraction over the shared key-value store the limiters coordinate through.
//!
//! The remote limiter variants (counter, token bucket, leaky bucket) need
//! exactly four operations from the store: a liveness check, script
//! existence/loading keyed by content hash, and atomic script evaluation.
//! Everything else (TTLs, key layout) is encoded in the scripts themselves.

use redis::aio::ConnectionManager;

use crate::error::Result;

/// Operations a rate limiter needs from its backing store.
///
/// Implemented against [`redis::aio::ConnectionManager`] for production use,
/// and mocked in tests so the limiter variants can be exercised without a
/// live Redis-compatible server.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Checks the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Returns whether a script with the given SHA-1 hash is already
    /// loaded into the store's script cache.
    async fn script_exists(&self, sha1: &str) -> Result<bool>;

    /// Loads a script's source into the store's script cache.
    async fn script_load(&self, source: &str) -> Result<()>;

    /// Evaluates a previously loaded script by its SHA-1 hash against a
    /// single key, passing the given arguments, and returns its integer
    /// result.
    async fn eval_sha(&self, sha1: &str, key: &str, args: &[i64]) -> Result<i64>;
}

/// A [`Store`] backed by a live Redis-compatible connection.
///
/// Wraps a [`ConnectionManager`] rather than a bare [`redis::Client`] so
/// a single handle can be shared (cheaply cloned) across many limiters and
/// survives transient disconnects by reconnecting automatically.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Opens a connection to `redis_url` and wraps it in a reconnecting
    /// [`ConnectionManager`].
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wraps an already-constructed connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn script_exists(&self, sha1: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: Vec<bool> = redis::cmd("SCRIPT")
            .arg("EXISTS")
            .arg(sha1)
            .query_async(&mut conn)
            .await?;
        Ok(exists.first().copied().unwrap_or(false))
    }

    async fn script_load(&self, source: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn eval_sha(&self, sha1: &str, key: &str, args: &[i64]) -> Result<i64> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha1).arg(1).arg(key);
        for arg in args {
            cmd.arg(arg);
        }
        let result: i64 = cmd.query_async(&mut conn).await?;
        Ok(result)
    }
}

#[cfg(test)]
mockall::mock! {
    pub Store {}

    #[async_trait::async_trait]
    impl Store for Store {
        async fn ping(&self) -> Result<()>;
        async fn script_exists(&self, sha1: &str) -> Result<bool>;
        async fn script_load(&self, source: &str) -> Result<()>;
        async fn eval_sha(&self, sha1: &str, key: &str, args: &[i64]) -> Result<i64>;
    }
}
