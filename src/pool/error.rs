use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by a [`ConnectionPool`](super::ConnectionPool) implementation.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("Pool {address} is closed")]
    Closed { address: String },

    #[error("Timed out after {waited:?} waiting for a connection from pool {address}")]
    WaitQueueTimeout { address: String, waited: Duration },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported pool operation: {0}")]
    Unsupported(String),
}

impl PoolError {
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            PoolError::Closed { .. } => "PoolClosedError",
            PoolError::WaitQueueTimeout { .. } => "WaitQueueTimeoutError",
            PoolError::Connection(_) => "ConnectionError",
            PoolError::Unsupported(_) => "UnsupportedError",
        }
    }
}
