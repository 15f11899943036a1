//! Connection lifecycle management.
//!
//! This module defines the trait a backing resource implements to be pooled,
//! and the bookkeeping the pool keeps for every connection it owns.

use std::time::{Duration, Instant};

use crate::error::PoolError;

/// Trait for opening, probing and cleaning up connections to one backing
/// resource.
///
/// The pool calls [`connect`](Self::connect) to grow,
/// [`health_check`](Self::health_check) before handing out a connection that
/// sat in the idle buffer, and [`reset`](Self::reset) every time a connection
/// comes back from a caller.
///
/// `reset` is synchronous because it runs from the drop of the connection
/// guard. Implementations should keep it to a local rollback.
#[async_trait::async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// The connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Open a new connection to the backing resource.
    ///
    /// Failures should be reported as [`PoolError::ConnectionCreation`].
    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Check that the connection is alive and responsive.
    ///
    /// Typically executes a trivial query such as `SELECT 1`.
    async fn health_check(&self, conn: &mut Self::Connection) -> Result<(), PoolError>;

    /// Roll back any uncommitted state before the connection is reused.
    fn reset(&self, conn: &mut Self::Connection) -> Result<(), PoolError>;

    /// Cheap check run on return. A connection reporting `false` is discarded
    /// instead of going back to the idle buffer.
    fn is_valid(&self, _conn: &Self::Connection) -> bool {
        true
    }

    /// Identifier of the backing resource, for logs and status output.
    fn target(&self) -> &str;
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Identifier unique within one pool.
    pub id: u64,
    /// Generation of the pool that created this connection.
    pub generation: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new(id: u64, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            generation,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last checked out or returned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub(crate) fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    pub(crate) fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}

/// A connection together with its metadata, as stored in the idle buffer.
pub(crate) struct Entry<C> {
    pub(crate) conn: C,
    pub(crate) meta: ConnectionMetadata,
}

impl<C> Entry<C> {
    pub(crate) fn new(conn: C, meta: ConnectionMetadata) -> Self {
        Self { conn, meta }
    }
}
