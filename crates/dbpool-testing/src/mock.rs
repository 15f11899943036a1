//! Scriptable in-process backing resource.
//!
//! [`MockManager`] implements [`ManageConnection`] without any real database.
//! Tests script its failures (refused connects, broken handles, failing
//! rollbacks) and read back counters to check what the pool did.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dbpool::{ManageConnection, PoolError};
use parking_lot::Mutex;

#[derive(Default)]
struct MockState {
    next_handle: AtomicU64,
    open: Mutex<HashSet<u64>>,
    broken: Mutex<HashSet<u64>>,
    connect_delay: Mutex<Option<Duration>>,
    fail_next_connects: AtomicU32,
    refuse_connects: AtomicBool,
    fail_resets: AtomicBool,
    connects: AtomicU64,
    failed_connects: AtomicU64,
    health_checks: AtomicU64,
    resets: AtomicU64,
}

/// Connection manager backed by in-memory fake handles.
///
/// Clones share state, so a test can keep one clone for scripting while the
/// pool owns another.
#[derive(Clone)]
pub struct MockManager {
    target: Arc<str>,
    state: Arc<MockState>,
}

impl Default for MockManager {
    fn default() -> Self {
        Self::new("mock://default")
    }
}

impl MockManager {
    /// Create a manager reporting `target` as its backing resource.
    pub fn new(target: impl Into<Arc<str>>) -> Self {
        Self {
            target: target.into(),
            state: Arc::new(MockState::default()),
        }
    }

    /// Make the next `count` connects fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.fail_next_connects.store(count, Ordering::SeqCst);
    }

    /// Refuse every connect until turned off again.
    pub fn refuse_connects(&self, refuse: bool) {
        self.state.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Make every rollback on return fail.
    pub fn fail_resets(&self, fail: bool) {
        self.state.fail_resets.store(fail, Ordering::SeqCst);
    }

    /// Delay every connect, to widen race and cancellation windows.
    pub fn connect_delay(&self, delay: Option<Duration>) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Mark one handle as broken: its next health check fails.
    pub fn break_handle(&self, handle: u64) {
        self.state.broken.lock().insert(handle);
    }

    /// Mark every handle that is currently open as broken.
    pub fn break_all(&self) {
        let open: Vec<u64> = self.state.open.lock().iter().copied().collect();
        self.state.broken.lock().extend(open);
    }

    /// Handles that exist right now (not yet dropped).
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.state.open.lock().len()
    }

    /// Whether `handle` still exists.
    #[must_use]
    pub fn is_open(&self, handle: u64) -> bool {
        self.state.open.lock().contains(&handle)
    }

    /// Successful connects so far.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Failed connects so far.
    #[must_use]
    pub fn failed_connects(&self) -> u64 {
        self.state.failed_connects.load(Ordering::SeqCst)
    }

    /// Health checks run so far.
    #[must_use]
    pub fn health_checks(&self) -> u64 {
        self.state.health_checks.load(Ordering::SeqCst)
    }

    /// Rollbacks attempted so far.
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.state.resets.load(Ordering::SeqCst)
    }

    fn should_refuse(&self) -> bool {
        if self.state.refuse_connects.load(Ordering::SeqCst) {
            return true;
        }
        self.state
            .fail_next_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl ManageConnection for MockManager {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, PoolError> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_refuse() {
            self.state.failed_connects.fetch_add(1, Ordering::SeqCst);
            return Err(PoolError::ConnectionCreation(format!(
                "{}: connection refused",
                self.target
            )));
        }

        let handle = self.state.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.open.lock().insert(handle);
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(handle, "mock connection opened");

        Ok(MockConnection {
            handle,
            state: Arc::clone(&self.state),
            in_transaction: false,
            pending: Vec::new(),
            committed: 0,
            invalid: false,
        })
    }

    async fn health_check(&self, conn: &mut MockConnection) -> Result<(), PoolError> {
        self.state.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.state.broken.lock().contains(&conn.handle) {
            return Err(PoolError::UnhealthyConnection(format!(
                "handle {} is broken",
                conn.handle
            )));
        }
        Ok(())
    }

    fn reset(&self, conn: &mut MockConnection) -> Result<(), PoolError> {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_resets.load(Ordering::SeqCst) {
            return Err(PoolError::ResetFailed(format!(
                "handle {}: cannot rollback",
                conn.handle
            )));
        }
        conn.rollback();
        Ok(())
    }

    fn is_valid(&self, conn: &MockConnection) -> bool {
        !conn.invalid
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// A fake connection with just enough transaction state to observe rollbacks.
pub struct MockConnection {
    handle: u64,
    state: Arc<MockState>,
    in_transaction: bool,
    pending: Vec<String>,
    committed: usize,
    invalid: bool,
}

impl MockConnection {
    /// Backend handle number, unique per manager.
    #[must_use]
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Start a transaction.
    pub fn begin(&mut self) {
        self.in_transaction = true;
    }

    /// Run a write. Inside a transaction it stays pending until commit.
    pub fn execute(&mut self, statement: &str) {
        if self.in_transaction {
            self.pending.push(statement.to_string());
        } else {
            self.committed += 1;
        }
    }

    /// Commit pending writes.
    pub fn commit(&mut self) {
        self.committed += self.pending.len();
        self.pending.clear();
        self.in_transaction = false;
    }

    /// Drop pending writes.
    pub fn rollback(&mut self) {
        self.pending.clear();
        self.in_transaction = false;
    }

    /// Whether a transaction is open or writes are pending.
    #[must_use]
    pub fn has_uncommitted(&self) -> bool {
        self.in_transaction || !self.pending.is_empty()
    }

    /// Number of committed writes on this handle.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Make the connection report itself unusable when returned.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("handle", &self.handle)
            .field("in_transaction", &self.in_transaction)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.open.lock().remove(&self.handle);
    }
}
