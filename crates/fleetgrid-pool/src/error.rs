//! Pool error types.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("insufficient resources on {pool}: requested {requested}, available {available}")]
    Insufficient {
        pool: String,
        requested: String,
        available: String,
    },

    #[error("no pool can satisfy {0}")]
    Unavailable(String),

    #[error("allocation timed out")]
    Timeout,

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("unknown allocation: {0}")]
    UnknownAlloc(String),
}
