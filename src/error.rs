//! Error types returned by this crate.

use std::time::Instant;

/// Errors that can occur while constructing or operating a [`crate::Limiter`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration supplied to a limiter constructor.
    #[error("invalid rate limiter configuration: {0}")]
    Config(String),

    /// The underlying store returned an error while evaluating a script
    /// or performing a keyspace operation.
    #[error("rate limiter store error: {0}")]
    Store(#[from] redis::RedisError),

    /// `wait` was asked for a deadline that cannot be honored: less time
    /// remains than the limiter's minimum poll interval.
    #[error("can't get a token before {deadline:?}")]
    DeadlineInfeasible {
        /// The deadline the caller supplied.
        deadline: Instant,
    },

    /// `wait` was cancelled before a token became available.
    #[error("rate limiter wait was cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
