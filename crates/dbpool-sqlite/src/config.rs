//! SQLite connection configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dbpool::PoolError;

/// Default database file when none is configured.
pub const DEFAULT_DATABASE_PATH: &str = "app.db";

/// Default time a connection waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default page cache size, in pages.
pub const DEFAULT_CACHE_SIZE: i64 = 10_000;

/// Default query used to test idle connections.
pub const DEFAULT_HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// SQLite `journal_mode` pragma values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Rollback journal deleted after each transaction.
    Delete,
    /// Rollback journal truncated after each transaction.
    Truncate,
    /// Rollback journal header zeroed after each transaction.
    Persist,
    /// Rollback journal kept in memory.
    Memory,
    /// Write-ahead log.
    #[default]
    Wal,
    /// No journal.
    Off,
}

impl JournalMode {
    /// Pragma value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }
}

impl FromStr for JournalMode {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DELETE" => Ok(Self::Delete),
            "TRUNCATE" => Ok(Self::Truncate),
            "PERSIST" => Ok(Self::Persist),
            "MEMORY" => Ok(Self::Memory),
            "WAL" => Ok(Self::Wal),
            "OFF" => Ok(Self::Off),
            _ => Err(PoolError::Configuration(format!("invalid journal mode: {s}"))),
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQLite `synchronous` pragma values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Synchronous {
    /// Hand writes to the OS without syncing.
    Off,
    /// Sync at critical moments; safe with WAL.
    #[default]
    Normal,
    /// Sync on every commit.
    Full,
    /// Like `Full`, and also sync the directory on journal unlink.
    Extra,
}

impl Synchronous {
    /// Pragma value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
            Self::Extra => "EXTRA",
        }
    }
}

impl FromStr for Synchronous {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" | "0" => Ok(Self::Off),
            "NORMAL" | "1" => Ok(Self::Normal),
            "FULL" | "2" => Ok(Self::Full),
            "EXTRA" | "3" => Ok(Self::Extra),
            _ => Err(PoolError::Configuration(format!("invalid synchronous mode: {s}"))),
        }
    }
}

/// SQLite `temp_store` pragma values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempStore {
    /// Compile-time default.
    Default,
    /// Temporary tables and indices on disk.
    File,
    /// Temporary tables and indices in memory.
    #[default]
    Memory,
}

impl TempStore {
    /// Pragma value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::File => "FILE",
            Self::Memory => "MEMORY",
        }
    }
}

impl FromStr for TempStore {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" | "0" => Ok(Self::Default),
            "FILE" | "1" => Ok(Self::File),
            "MEMORY" | "2" => Ok(Self::Memory),
            _ => Err(PoolError::Configuration(format!("invalid temp store: {s}"))),
        }
    }
}

/// How every pooled SQLite connection is opened and tested.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct SqliteConfig {
    /// Database file path, or `:memory:`.
    pub path: String,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Journal mode applied on open.
    pub journal_mode: JournalMode,
    /// Synchronous mode applied on open.
    pub synchronous: Synchronous,
    /// Page cache size applied on open. Negative values are KiB.
    pub cache_size: i64,
    /// Where temporary tables live.
    pub temp_store: TempStore,
    /// Whether foreign key enforcement is switched on.
    pub foreign_keys: bool,
    /// Query run against idle connections before checkout.
    pub health_check_query: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATABASE_PATH.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_mode: JournalMode::default(),
            synchronous: Synchronous::default(),
            cache_size: DEFAULT_CACHE_SIZE,
            temp_store: TempStore::default(),
            foreign_keys: false,
            health_check_query: DEFAULT_HEALTH_CHECK_QUERY.to_string(),
        }
    }
}

impl SqliteConfig {
    /// Configuration for the database at `path` with default pragmas.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the busy timeout.
    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the journal mode.
    #[must_use]
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Set the synchronous mode.
    #[must_use]
    pub fn synchronous(mut self, mode: Synchronous) -> Self {
        self.synchronous = mode;
        self
    }

    /// Set the page cache size.
    #[must_use]
    pub fn cache_size(mut self, pages: i64) -> Self {
        self.cache_size = pages;
        self
    }

    /// Set where temporary tables live.
    #[must_use]
    pub fn temp_store(mut self, store: TempStore) -> Self {
        self.temp_store = store;
        self
    }

    /// Enable or disable foreign key enforcement.
    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Set the query used to test idle connections.
    #[must_use]
    pub fn health_check_query(mut self, query: impl Into<String>) -> Self {
        self.health_check_query = query.into();
        self
    }

    /// Whether connections open private in-memory databases.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.path.trim().is_empty() {
            return Err(PoolError::Configuration("database path cannot be empty".into()));
        }
        if self.health_check_query.trim().is_empty() {
            return Err(PoolError::Configuration(
                "health check query cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Parse SQLite settings from an ADO-style `key=value;` connection string.
    ///
    /// Recognized keys (case-insensitive): `Data Source` (also `Database`,
    /// `Path`), `Busy Timeout` (seconds), `Journal Mode`, `Synchronous`,
    /// `Cache Size`, `Temp Store`, `Foreign Keys`, `Health Check Query`.
    /// Pool keys and anything else are skipped.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "data source" | "database" | "path" | "filename" => {
                    config.path = value.to_string();
                }
                "busy timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid busy timeout: {value}"))
                    })?;
                    config.busy_timeout = Duration::from_secs(secs);
                }
                "journal mode" => config.journal_mode = value.parse()?,
                "synchronous" => config.synchronous = value.parse()?,
                "cache size" => {
                    config.cache_size = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid cache size: {value}"))
                    })?;
                }
                "temp store" => config.temp_store = value.parse()?,
                "foreign keys" => {
                    config.foreign_keys = matches!(
                        value.to_lowercase().as_str(),
                        "true" | "yes" | "1" | "on"
                    );
                }
                "health check query" => config.health_check_query = value.to_string(),
                _ => {
                    tracing::debug!(key = %key, "ignoring non-sqlite connection string option");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SqliteConfig::default();
        assert_eq!(config.path, "app.db");
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert_eq!(config.synchronous, Synchronous::Normal);
        assert_eq!(config.cache_size, 10_000);
        assert_eq!(config.temp_store, TempStore::Memory);
        assert_eq!(config.busy_timeout, Duration::from_secs(30));
        assert_eq!(config.health_check_query, "SELECT 1");
        assert!(!config.foreign_keys);
        assert!(!config.is_memory());
    }

    #[test]
    fn test_from_connection_string() {
        let config = SqliteConfig::from_connection_string(
            "Data Source=/var/lib/blog/blog.db;Journal Mode=delete;Synchronous=FULL;\
             Cache Size=-2000;Temp Store=file;Foreign Keys=true;Busy Timeout=5;\
             Max Pool Size=20",
        )
        .unwrap();

        assert_eq!(config.path, "/var/lib/blog/blog.db");
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert_eq!(config.synchronous, Synchronous::Full);
        assert_eq!(config.cache_size, -2000);
        assert_eq!(config.temp_store, TempStore::File);
        assert!(config.foreign_keys);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_connection_string_memory() {
        let config = SqliteConfig::from_connection_string("Data Source=:memory:").unwrap();
        assert!(config.is_memory());
    }

    #[test]
    fn test_from_connection_string_rejects_bad_values() {
        assert!(SqliteConfig::from_connection_string("Journal Mode=sideways").is_err());
        assert!(SqliteConfig::from_connection_string("Cache Size=lots").is_err());
        assert!(SqliteConfig::from_connection_string("Data Source=").is_err());
        assert!(SqliteConfig::from_connection_string("no equals sign").is_err());
    }

    #[test]
    fn test_builder() {
        let config = SqliteConfig::new(":memory:")
            .journal_mode(JournalMode::Memory)
            .synchronous(Synchronous::Off)
            .foreign_keys(true)
            .health_check_query("SELECT count(*) FROM sqlite_master");

        assert!(config.is_memory());
        assert_eq!(config.journal_mode.to_string(), "MEMORY");
        assert_eq!(config.synchronous.as_str(), "OFF");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pragma_value_parsing() {
        assert_eq!("wal".parse::<JournalMode>().unwrap(), JournalMode::Wal);
        assert_eq!("1".parse::<Synchronous>().unwrap(), Synchronous::Normal);
        assert_eq!("2".parse::<TempStore>().unwrap(), TempStore::Memory);
        assert!("fast".parse::<Synchronous>().is_err());
    }
}
