//! Connection pool implementation.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::idle::{IdleQueue, Wait};
use crate::lifecycle::{ConnectionMetadata, Entry, ManageConnection};
use crate::metrics::{MetricsRecorder, PoolMetrics};

/// A bounded pool of connections to a single backing resource.
///
/// The pool opens connections lazily up to `max_connections`, validates idle
/// connections before handing them out, and rolls back and reclaims every
/// connection when its [`PooledConnection`] guard is dropped.
///
/// Cloning a `Pool` is cheap; clones share the same connections.
pub struct Pool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    generation: u64,
    idle: IdleQueue<Entry<M::Connection>>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    metrics: MetricsRecorder,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Connections created and not yet destroyed (idle + checked out).
    live: u32,
    closed: bool,
}

impl<M: ManageConnection> Pool<M> {
    /// Start building a pool around `manager`.
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder {
            manager,
            config: PoolConfig::default(),
            generation: 0,
        }
    }

    /// Create a pool and pre-warm it.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        Self::builder(manager).config(config).build().await
    }

    /// Get a connection from the pool.
    ///
    /// Waits up to `idle_wait` for an idle connection, then opens a new one if
    /// the pool is below `max_connections`. At capacity it waits for a
    /// connection to be returned until `acquire_timeout` has elapsed since the
    /// call started, then fails with [`PoolError::PoolExhausted`].
    ///
    /// Idle connections are health-checked first; a failing one is replaced
    /// by a freshly opened connection.
    ///
    /// Dropping the returned future before it completes leaks nothing.
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        let started = Instant::now();
        tracing::trace!(generation = self.inner.generation, "acquiring connection from pool");

        let result = self.inner.acquire(started).await;
        match &result {
            Ok(conn) => {
                self.inner.metrics.checkout_succeeded(started.elapsed());
                tracing::trace!(connection_id = conn.metadata().id, "connection checked out");
            }
            Err(e) => {
                self.inner.metrics.checkout_failed(e.is_exhausted());
                tracing::debug!(error = %e, "connection acquisition failed");
            }
        }
        result
    }

    /// Run `f` with exclusive access to a pooled connection.
    ///
    /// The connection goes back to the pool when `f` returns or unwinds.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(&mut M::Connection) -> T,
    {
        let mut conn = self.get().await?;
        Ok(f(&mut *conn))
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let live = self.inner.state.lock().live;
        let idle = u32::try_from(self.inner.idle.len()).unwrap_or(u32::MAX);
        PoolStatus {
            idle,
            available: idle,
            in_use: live.saturating_sub(idle),
            live,
            max: self.inner.config.max_connections,
        }
    }

    /// Get a snapshot of the pool's lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Close the pool.
    ///
    /// Idle connections are destroyed and the live count drops to zero.
    /// Pending acquires fail with [`PoolError::PoolClosed`]. Connections that
    /// are checked out stay usable; they are destroyed when released.
    /// Closing twice is a no-op.
    pub async fn close(&self) {
        self.inner.close();
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Identifier of the backing resource.
    #[must_use]
    pub fn target(&self) -> &str {
        self.inner.manager.target()
    }

    /// Generation number stamped on every connection this pool creates.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Access the connection manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.target())
            .field("generation", &self.inner.generation)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for [`Pool`].
#[must_use]
pub struct PoolBuilder<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    generation: u64,
}

impl<M: ManageConnection> PoolBuilder<M> {
    /// Replace the whole configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config = self.config.max_connections(count);
        self
    }

    /// Set the number of connections opened while building.
    pub fn prewarm(mut self, count: u32) -> Self {
        self.config = self.config.prewarm(count);
        self
    }

    /// Set the connection acquisition timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.acquire_timeout(timeout);
        self
    }

    /// Set how long an acquire waits for an idle connection before opening one.
    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.config = self.config.idle_wait(wait);
        self
    }

    /// Enable or disable testing connections on checkout.
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.config = self.config.test_on_checkout(enabled);
        self
    }

    /// Discard connections whose rollback fails on return.
    pub fn discard_on_reset_failure(mut self, enabled: bool) -> Self {
        self.config = self.config.discard_on_reset_failure(enabled);
        self
    }

    /// Set the generation number stamped on this pool's connections.
    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Validate the configuration, build the pool and pre-warm it.
    ///
    /// Pre-warm failures are logged and tolerated; the pool may start empty.
    pub async fn build(self) -> Result<Pool<M>, PoolError> {
        self.config.validate()?;

        let capacity = self.config.max_connections as usize;
        let inner = Arc::new(PoolInner {
            manager: self.manager,
            config: self.config,
            generation: self.generation,
            idle: IdleQueue::new(capacity),
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
            metrics: MetricsRecorder::default(),
        });

        let warmed = inner.prewarm().await;
        tracing::info!(
            resource = inner.manager.target(),
            generation = inner.generation,
            max_connections = inner.config.max_connections,
            warmed,
            "connection pool created"
        );

        Ok(Pool { inner })
    }
}

impl<M: ManageConnection> PoolInner<M> {
    async fn prewarm(&self) -> u32 {
        let mut warmed = 0;
        for _ in 0..self.config.prewarm_target() {
            let Some(slot) = self.reserve_slot() else {
                break;
            };
            match self.open(slot).await {
                Ok(entry) => match self.idle.push(entry) {
                    Ok(()) => warmed += 1,
                    Err(entry) => self.discard(entry),
                },
                Err(e) => {
                    tracing::warn!(
                        resource = self.manager.target(),
                        error = %e,
                        "failed to pre-warm connection"
                    );
                }
            }
        }
        warmed
    }

    async fn acquire(self: &Arc<Self>, started: Instant) -> Result<PooledConnection<M>, PoolError> {
        self.ensure_open()?;

        let deadline = started + self.config.acquire_timeout;
        let idle_deadline = (started + self.config.idle_wait).min(deadline);

        // Prefer a returned connection for a short while before growing.
        match self.idle.pop_or_wait(idle_deadline).await {
            Wait::Ready(entry) => return self.checkout_idle(entry).await,
            Wait::Woken | Wait::TimedOut => {}
        }

        loop {
            self.ensure_open()?;

            if let Some(slot) = self.reserve_slot() {
                let entry = self.open(slot).await?;
                return self.hand_out(PooledConnection::new(Arc::clone(self), entry));
            }

            match self.idle.pop_or_wait(deadline).await {
                Wait::Ready(entry) => return self.checkout_idle(entry).await,
                Wait::Woken => {}
                Wait::TimedOut => {
                    self.ensure_open()?;
                    return Err(PoolError::PoolExhausted(self.config.acquire_timeout));
                }
            }
        }
    }

    async fn checkout_idle(
        self: &Arc<Self>,
        entry: Entry<M::Connection>,
    ) -> Result<PooledConnection<M>, PoolError> {
        // Wrapped first so a cancelled health check still returns the connection.
        let mut conn = PooledConnection::new(Arc::clone(self), entry);

        if self.config.test_on_checkout {
            if let Err(e) = self.manager.health_check(&mut *conn).await {
                self.metrics.health_check_failed();
                if let Some(stale) = conn.entry.take() {
                    tracing::warn!(
                        connection_id = stale.meta.id,
                        error = %e,
                        "idle connection failed health check, replacing"
                    );
                    drop(stale);
                    self.metrics.connection_closed();
                }

                // The stale connection's slot carries over to its replacement.
                let slot = Slot {
                    pool: self,
                    held: true,
                };
                conn.entry = Some(self.open(slot).await?);
            }
        }

        self.hand_out(conn)
    }

    fn hand_out(&self, mut conn: PooledConnection<M>) -> Result<PooledConnection<M>, PoolError> {
        // Dropping `conn` here discards it, since the pool is closed.
        self.ensure_open()?;
        if let Some(entry) = conn.entry.as_mut() {
            entry.meta.mark_checkout();
        }
        Ok(conn)
    }

    async fn open(&self, slot: Slot<'_, M>) -> Result<Entry<M::Connection>, PoolError> {
        let conn = self
            .manager
            .connect()
            .await
            .map_err(PoolError::into_creation_error)?;
        slot.keep();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.connection_created();
        tracing::debug!(
            resource = self.manager.target(),
            connection_id = id,
            generation = self.generation,
            "opened connection"
        );

        Ok(Entry::new(conn, ConnectionMetadata::new(id, self.generation)))
    }

    fn release(&self, mut entry: Entry<M::Connection>) {
        if self.is_closed() {
            tracing::trace!(connection_id = entry.meta.id, "pool closed, discarding returned connection");
            self.discard(entry);
            return;
        }

        let reset_failed = match self.manager.reset(&mut entry.conn) {
            Ok(()) => false,
            Err(e) => {
                self.metrics.reset_failed();
                tracing::warn!(connection_id = entry.meta.id, error = %e, "failed to roll back returned connection");
                true
            }
        };

        if (reset_failed && self.config.discard_on_reset_failure)
            || !self.manager.is_valid(&entry.conn)
        {
            self.discard(entry);
            return;
        }

        entry.meta.mark_checkin();
        let id = entry.meta.id;
        match self.idle.push(entry) {
            Ok(()) => {
                tracing::trace!(connection_id = id, "returned connection to pool");
                // A close that raced with the push has already drained the buffer.
                if self.is_closed() {
                    for entry in self.idle.drain() {
                        self.discard(entry);
                    }
                }
            }
            Err(entry) => {
                tracing::debug!(connection_id = id, "idle buffer full, discarding connection");
                self.discard(entry);
            }
        }
    }

    /// Destroy a connection and free its slot.
    fn discard(&self, entry: Entry<M::Connection>) {
        tracing::debug!(connection_id = entry.meta.id, "discarding connection");
        drop(entry);
        self.metrics.connection_closed();
        self.release_slot();
    }

    fn reserve_slot(&self) -> Option<Slot<'_, M>> {
        let mut state = self.state.lock();
        if state.closed || state.live >= self.config.max_connections {
            return None;
        }
        state.live += 1;
        Some(Slot {
            pool: self,
            held: true,
        })
    }

    fn release_slot(&self) {
        {
            let mut state = self.state.lock();
            // `close` already zeroed the count.
            if !state.closed {
                state.live = state.live.saturating_sub(1);
            }
        }
        self.idle.wake_one();
    }

    fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.live = 0;
        }
        self.idle.close();

        let drained = self.idle.drain();
        let count = drained.len();
        for entry in drained {
            drop(entry);
            self.metrics.connection_closed();
        }

        tracing::info!(
            resource = self.manager.target(),
            generation = self.generation,
            closed_idle = count,
            "connection pool closed"
        );
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_open(&self) -> Result<(), PoolError> {
        if self.is_closed() {
            Err(PoolError::PoolClosed)
        } else {
            Ok(())
        }
    }
}

/// A reserved unit of `live`, released on drop unless kept.
struct Slot<'a, M: ManageConnection> {
    pool: &'a PoolInner<M>,
    held: bool,
}

impl<M: ManageConnection> Slot<'_, M> {
    fn keep(mut self) {
        self.held = false;
    }
}

impl<M: ManageConnection> Drop for Slot<'_, M> {
    fn drop(&mut self) {
        if self.held {
            self.pool.release_slot();
        }
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of connections sitting in the idle buffer.
    pub idle: u32,
    /// Number of connections available for immediate checkout (same as `idle`).
    pub available: u32,
    /// Number of connections currently checked out.
    pub in_use: u32,
    /// Number of live connections (idle + checked out).
    pub live: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Checked-out connections as a percentage of `max`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            f64::from(self.in_use) / f64::from(self.max) * 100.0
        }
    }

    /// Whether the pool cannot open another connection.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.live >= self.max
    }
}

/// A connection retrieved from the pool.
///
/// Dereferences to the underlying connection. When dropped, the connection is
/// rolled back and returned to the pool.
pub struct PooledConnection<M: ManageConnection> {
    pool: Arc<PoolInner<M>>,
    entry: Option<Entry<M::Connection>>,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(pool: Arc<PoolInner<M>>, entry: Entry<M::Connection>) -> Self {
        Self {
            pool,
            entry: Some(entry),
        }
    }

    #[allow(clippy::expect_used)] // only `Drop` and `detach` take the entry
    fn entry(&self) -> &Entry<M::Connection> {
        self.entry.as_ref().expect("pooled connection used after release")
    }

    #[allow(clippy::expect_used)]
    fn entry_mut(&mut self) -> &mut Entry<M::Connection> {
        self.entry.as_mut().expect("pooled connection used after release")
    }

    /// Metadata the pool keeps about this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.entry().meta
    }

    /// Detach the connection from the pool.
    ///
    /// The pool forgets the connection and frees its slot; the caller now
    /// owns it outright.
    pub fn detach(mut self) -> Option<M::Connection> {
        let entry = self.entry.take()?;
        tracing::debug!(connection_id = entry.meta.id, "detaching connection from pool");
        self.pool.release_slot();
        Some(entry.conn)
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.entry().conn
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry_mut().conn
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.entry.as_ref().map(|e| &e.meta))
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release(entry);
        }
    }
}
