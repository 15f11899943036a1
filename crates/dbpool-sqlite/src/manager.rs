//! rusqlite-backed connection manager.

use std::sync::Arc;

use async_trait::async_trait;
use dbpool::{ManageConnection, PoolError};
use rusqlite::{Connection, OpenFlags};

use crate::config::SqliteConfig;

/// Opens, tests and resets SQLite connections for a [`dbpool::Pool`].
///
/// Connections are opened on tokio's blocking pool with the configured
/// pragmas applied. A connection handed back with an open transaction is
/// rolled back before it becomes idle again.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    config: Arc<SqliteConfig>,
}

impl SqliteManager {
    /// Create a manager for `config`.
    pub fn new(config: SqliteConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Configuration every connection is opened with.
    #[must_use]
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn open_blocking(config: &SqliteConfig) -> Result<Connection, rusqlite::Error> {
        let conn = if config.is_memory() {
            Connection::open_in_memory()?
        } else {
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(&config.path, flags)?
        };

        conn.busy_timeout(config.busy_timeout)?;

        // In-memory databases report "memory" whatever was asked for.
        let journal_mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.journal_mode.as_str(),
            |row| row.get(0),
        )?;
        conn.pragma_update(None, "synchronous", config.synchronous.as_str())?;
        conn.pragma_update(None, "cache_size", config.cache_size)?;
        conn.pragma_update(None, "temp_store", config.temp_store.as_str())?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;

        tracing::trace!(path = %config.path, journal_mode = %journal_mode, "applied sqlite pragmas");
        Ok(conn)
    }
}

#[async_trait]
impl ManageConnection for SqliteManager {
    type Connection = Connection;

    async fn connect(&self) -> Result<Connection, PoolError> {
        let config = Arc::clone(&self.config);
        let conn = tokio::task::spawn_blocking(move || Self::open_blocking(&config))
            .await
            .map_err(|e| PoolError::ConnectionCreation(format!("open task failed: {e}")))?
            .map_err(|e| {
                PoolError::ConnectionCreation(format!(
                    "failed to open SQLite database at '{}': {e}",
                    self.config.path
                ))
            })?;

        tracing::debug!(path = %self.config.path, "SQLite connection established");
        Ok(conn)
    }

    async fn health_check(&self, conn: &mut Connection) -> Result<(), PoolError> {
        conn.query_row(&self.config.health_check_query, [], |_| Ok(()))
            .map_err(|e| PoolError::UnhealthyConnection(e.to_string()))
    }

    fn reset(&self, conn: &mut Connection) -> Result<(), PoolError> {
        if conn.is_autocommit() {
            return Ok(());
        }
        tracing::trace!(path = %self.config.path, "rolling back open transaction");
        conn.execute_batch("ROLLBACK")
            .map_err(|e| PoolError::ResetFailed(e.to_string()))
    }

    fn target(&self) -> &str {
        &self.config.path
    }
}
