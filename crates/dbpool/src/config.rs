//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default upper bound on live connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default time an acquire may wait before failing with
/// [`PoolError::PoolExhausted`].
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time an acquire waits for an idle connection before growing the pool.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(5);

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of live connections (idle + checked out).
    pub max_connections: u32,

    /// Number of connections opened eagerly when the pool is built.
    ///
    /// `None` means half of `max_connections`, but at least one.
    pub prewarm: Option<u32>,

    /// Total time an acquire may wait for a connection.
    pub acquire_timeout: Duration,

    /// Time an acquire waits for an idle connection before it tries to open
    /// a new one. Never extends past `acquire_timeout`.
    pub idle_wait: Duration,

    /// Whether to health-check idle connections on checkout.
    pub test_on_checkout: bool,

    /// Whether a connection whose rollback failed on return is discarded
    /// instead of going back to the idle buffer.
    pub discard_on_reset_failure: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            prewarm: None,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_wait: DEFAULT_IDLE_WAIT,
            test_on_checkout: true,
            discard_on_reset_failure: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the number of connections opened when the pool is built.
    #[must_use]
    pub fn prewarm(mut self, count: u32) -> Self {
        self.prewarm = Some(count);
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set how long an acquire waits for an idle connection before opening one.
    #[must_use]
    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    /// Enable or disable testing connections on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Discard connections whose rollback fails on return.
    ///
    /// Off by default: such connections go back to the idle buffer and the next
    /// checkout health check decides their fate. Turning it on trades a little
    /// more connection churn for never reusing a connection in an unknown state.
    #[must_use]
    pub fn discard_on_reset_failure(mut self, enabled: bool) -> Self {
        self.discard_on_reset_failure = enabled;
        self
    }

    /// Number of connections to open while building the pool.
    #[must_use]
    pub fn prewarm_target(&self) -> u32 {
        self.prewarm
            .unwrap_or_else(|| (self.max_connections / 2).max(1))
            .min(self.max_connections)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.prewarm.is_some_and(|n| n > self.max_connections) {
            return Err(PoolError::Configuration(
                "prewarm cannot be greater than max_connections".into(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Parse pool settings from an ADO-style `key=value;` connection string.
    ///
    /// Recognized keys (case-insensitive):
    ///
    /// - `Max Pool Size`
    /// - `Prewarm` / `Min Pool Size`
    /// - `Pool Timeout` / `Connection Timeout` (seconds)
    /// - `Idle Wait` (milliseconds)
    /// - `Test On Checkout`
    /// - `Discard On Reset Failure`
    ///
    /// Other keys belong to the backing resource and are skipped, so the same
    /// string can configure both the pool and its connection manager.
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
                "max pool size" | "max connections" => {
                    config.max_connections = parse_number(value, "pool size")?;
                }
                "prewarm" | "min pool size" => {
                    config.prewarm = Some(parse_number(value, "pool size")?);
                }
                "pool timeout" | "connection timeout" | "connect timeout" => {
                    config.acquire_timeout = Duration::from_secs(parse_number(value, "timeout")?);
                }
                "idle wait" => {
                    config.idle_wait = Duration::from_millis(parse_number(value, "idle wait")?);
                }
                "test on checkout" => {
                    config.test_on_checkout = parse_flag(value)?;
                }
                "discard on reset failure" => {
                    config.discard_on_reset_failure = parse_flag(value)?;
                }
                _ => {
                    tracing::debug!(key = %key, "ignoring non-pool connection string option");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Configuration(format!("invalid {what}: {value}")))
}

fn parse_flag(value: &str) -> Result<bool, PoolError> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") || value == "0"
    {
        Ok(false)
    } else {
        Err(PoolError::Configuration(format!("invalid boolean: {value}")))
    }
}
