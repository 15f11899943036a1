//! # dbpool-sqlite
//!
//! SQLite backing for [`dbpool`], built on `rusqlite`.
//!
//! Every pooled connection is opened with the same pragmas (WAL journal,
//! `NORMAL` sync, a 10000-page cache and in-memory temp tables unless
//! configured otherwise), tested with a cheap query before it is handed out
//! again, and rolled back if it comes back with an open transaction.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool_sqlite::{SqliteConfig, SqliteManager, SqlitePool};
//! use dbpool::PoolConfig;
//!
//! let manager = SqliteManager::new(SqliteConfig::new("blog.db"))?;
//! let pool = SqlitePool::new(manager, PoolConfig::new().max_connections(10)).await?;
//!
//! let conn = pool.get().await?;
//! let count: i64 = conn.query_row("SELECT count(*) FROM articles", [], |r| r.get(0))?;
//! ```
//!
//! Applications that want one pool for the whole process build a registry
//! from the environment once at startup:
//!
//! ```rust,ignore
//! let registry = dbpool_sqlite::registry_from_env()?;
//! let conn = registry.acquire().await?;
//! // ...
//! registry.shutdown().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod manager;

use std::time::Duration;

use dbpool::{Pool, PoolConfig, PoolError, PoolRegistry};

pub use config::{JournalMode, SqliteConfig, Synchronous, TempStore};
pub use manager::SqliteManager;

/// A pool of SQLite connections.
pub type SqlitePool = Pool<SqliteManager>;

/// A process-wide SQLite pool registry.
pub type SqliteRegistry = PoolRegistry<SqliteManager>;

/// Environment variable naming the database file.
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";

/// Environment variable overriding `max_connections`.
pub const ENV_MAX_CONNECTIONS: &str = "DB_POOL_MAX_CONNECTIONS";

/// Environment variable overriding the acquire timeout, in seconds.
pub const ENV_ACQUIRE_TIMEOUT: &str = "DB_POOL_ACQUIRE_TIMEOUT";

/// Build a registry from one connection string carrying both SQLite and
/// pool settings, e.g. `Data Source=blog.db;Max Pool Size=10`.
pub fn registry_from_connection_string(conn_str: &str) -> Result<SqliteRegistry, PoolError> {
    let sqlite = SqliteConfig::from_connection_string(conn_str)?;
    let pool = PoolConfig::from_connection_string(conn_str)?;
    Ok(PoolRegistry::new(SqliteManager::new(sqlite)?, pool))
}

/// Build a registry from `DATABASE_PATH` (default `app.db`),
/// `DB_POOL_MAX_CONNECTIONS` and `DB_POOL_ACQUIRE_TIMEOUT`.
pub fn registry_from_env() -> Result<SqliteRegistry, PoolError> {
    registry_from_lookup(|key| std::env::var(key).ok())
}

fn registry_from_lookup<F>(lookup: F) -> Result<SqliteRegistry, PoolError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = lookup(ENV_DATABASE_PATH).unwrap_or_else(|| config::DEFAULT_DATABASE_PATH.into());

    let mut pool = PoolConfig::new();
    if let Some(value) = lookup(ENV_MAX_CONNECTIONS) {
        let max = value.trim().parse().map_err(|_| {
            PoolError::Configuration(format!("invalid {ENV_MAX_CONNECTIONS}: {value}"))
        })?;
        pool = pool.max_connections(max);
    }
    if let Some(value) = lookup(ENV_ACQUIRE_TIMEOUT) {
        let secs = value.trim().parse().map_err(|_| {
            PoolError::Configuration(format!("invalid {ENV_ACQUIRE_TIMEOUT}: {value}"))
        })?;
        pool = pool.acquire_timeout(Duration::from_secs(secs));
    }
    pool.validate()?;

    tracing::debug!(path = %path, max_connections = pool.max_connections, "sqlite registry configured");
    Ok(PoolRegistry::new(
        SqliteManager::new(SqliteConfig::new(path))?,
        pool,
    ))
}
