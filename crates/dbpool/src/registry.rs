//! Process-wide pool lifecycle.
//!
//! A [`PoolRegistry`] is created once at startup and shared (usually behind an
//! `Arc`) with everything that needs a connection. It builds the pool on first
//! use, hands out the same pool to every caller, and can shut it down and build
//! a fresh one later.
//!
//! ```text
//! uninitialized --get()--> initialized --shutdown()--> uninitialized
//! ```
//!
//! Each pool the registry builds gets the next generation number. Connections
//! remember the pool that issued them, so a connection released after
//! `shutdown()` is destroyed instead of leaking into the next pool.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ManageConnection;
use crate::pool::{Pool, PoolStatus, PooledConnection};

/// Owner of the one pool a process uses for its backing resource.
pub struct PoolRegistry<M: ManageConnection + Clone> {
    manager: M,
    config: PoolConfig,
    current: Mutex<Option<Pool<M>>>,
    generations: AtomicU64,
}

impl<M: ManageConnection + Clone> PoolRegistry<M> {
    /// Create an empty registry. No connection is opened until the first
    /// [`get`](Self::get).
    pub fn new(manager: M, config: PoolConfig) -> Self {
        Self {
            manager,
            config,
            current: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    /// Return the current pool, building it first if there is none.
    ///
    /// Concurrent first callers are serialized; all of them observe the same
    /// pool. A pool that was closed directly is replaced.
    pub async fn get(&self) -> Result<Pool<M>, PoolError> {
        let mut current = self.current.lock().await;
        if let Some(pool) = current.as_ref() {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let pool = Pool::builder(self.manager.clone())
            .config(self.config.clone())
            .generation(generation)
            .build()
            .await?;
        *current = Some(pool.clone());
        Ok(pool)
    }

    /// Check a connection out of the current pool.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        let pool = self.get().await?;
        pool.get().await
    }

    /// Close the current pool and forget it. A no-op when there is none.
    pub async fn shutdown(&self) {
        let pool = self.current.lock().await.take();
        match pool {
            Some(pool) => {
                pool.close().await;
                tracing::info!(
                    resource = pool.target(),
                    generation = pool.generation(),
                    "pool registry shut down"
                );
            }
            None => tracing::debug!("pool registry shutdown with no pool"),
        }
    }

    /// Status of the current pool, if one has been built.
    pub async fn status(&self) -> Option<PoolStatus> {
        self.current.lock().await.as_ref().map(Pool::status)
    }

    /// Whether a pool has been built and not shut down.
    pub async fn is_initialized(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Configuration used for every pool this registry builds.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of pools built so far.
    #[must_use]
    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }
}
