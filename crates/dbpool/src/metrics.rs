//! Pool counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of the pool's lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Connections opened, including pre-warm and health-check replacements.
    pub connections_created: u64,
    /// Connections destroyed by the pool.
    pub connections_closed: u64,
    /// Acquires that returned a connection.
    pub checkouts_successful: u64,
    /// Acquires that returned an error (including timeouts).
    pub checkouts_failed: u64,
    /// Acquires that failed because the pool was exhausted.
    pub checkouts_timed_out: u64,
    /// Idle connections that failed their checkout health check.
    pub health_checks_failed: u64,
    /// Returns whose rollback failed.
    pub resets_failed: u64,
    /// Total time spent in successful acquires.
    pub total_wait: Duration,
}

impl PoolMetrics {
    /// Fraction of acquires that succeeded, `1.0` when nothing was attempted.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_successful as f64 / total as f64
        }
    }

    /// Mean wait of successful acquires.
    #[must_use]
    pub fn average_wait(&self) -> Duration {
        match u32::try_from(self.checkouts_successful) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_wait / n,
            Err(_) => Duration::from_secs_f64(
                self.total_wait.as_secs_f64() / self.checkouts_successful as f64,
            ),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    checkouts_timed_out: AtomicU64,
    health_checks_failed: AtomicU64,
    resets_failed: AtomicU64,
    total_wait_micros: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checkout_succeeded(&self, waited: Duration) {
        self.checkouts_successful.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.total_wait_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn checkout_failed(&self, exhausted: bool) {
        self.checkouts_failed.fetch_add(1, Ordering::Relaxed);
        if exhausted {
            self.checkouts_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn health_check_failed(&self) {
        self.health_checks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_failed(&self) {
        self.resets_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: self.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: self.checkouts_failed.load(Ordering::Relaxed),
            checkouts_timed_out: self.checkouts_timed_out.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            resets_failed: self.resets_failed.load(Ordering::Relaxed),
            total_wait: Duration::from_micros(self.total_wait_micros.load(Ordering::Relaxed)),
        }
    }
}
