//! Test fixture utilities.

use std::time::Duration;

use dbpool::{ManageConnection, Pool, PoolConfig, PoolStatus};

/// Pool configuration with short waits, for tests that do not pause time.
#[must_use]
pub fn fast_config(max_connections: u32) -> PoolConfig {
    PoolConfig::new()
        .max_connections(max_connections)
        .idle_wait(Duration::from_millis(10))
        .acquire_timeout(Duration::from_millis(500))
}

/// Install a fmt subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Assert the live-count bounds that must hold between any two operations.
///
/// # Panics
///
/// Panics when a bound is violated.
#[allow(clippy::panic)]
pub fn assert_bounds<M: ManageConnection>(pool: &Pool<M>) -> PoolStatus {
    let status = pool.status();
    if status.live > status.max {
        panic!("live count {} exceeds max {}", status.live, status.max);
    }
    if !pool.is_closed() && status.idle > status.live {
        panic!("idle count {} exceeds live count {}", status.idle, status.live);
    }
    status
}
