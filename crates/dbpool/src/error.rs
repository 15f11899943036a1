//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No connection became available within the acquire timeout.
    #[error("connection pool exhausted: no connection available within {0:?}")]
    PoolExhausted(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The backing resource refused or failed to open a new connection.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(String),

    /// Connection is unhealthy.
    #[error("connection health check failed: {0}")]
    UnhealthyConnection(String),

    /// Rolling back connection state failed.
    #[error("connection reset failed: {0}")]
    ResetFailed(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error means the pool ran out of connections.
    ///
    /// Exhaustion is the caller's signal to back off or shed load; it is
    /// distinct from the backing resource being unreachable.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted(_))
    }

    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted(_) | Self::ConnectionCreation(_) | Self::UnhealthyConnection(_)
        )
    }

    /// Turn any manager error raised while opening a connection into
    /// [`PoolError::ConnectionCreation`].
    pub(crate) fn into_creation_error(self) -> Self {
        match self {
            Self::ConnectionCreation(_) => self,
            other => Self::ConnectionCreation(other.to_string()),
        }
    }
}
