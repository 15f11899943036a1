//! # dbpool
//!
//! Bounded async connection pool for a single backing resource.
//!
//! The pool hands out exclusive connections, grows lazily up to a fixed
//! maximum, and makes every connection safe to reuse before the next caller
//! sees it.
//!
//! ## Features
//!
//! - Pre-warm of half the maximum at construction
//! - Health check of idle connections on checkout, with transparent replacement
//! - Rollback of uncommitted state on return
//! - Bounded waiting with a distinct exhaustion error
//! - RAII guards: a connection is returned on every exit path
//! - [`PoolRegistry`] for the build-once, shut-down, rebuild lifecycle
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .max_connections(20)
//!     .acquire_timeout(Duration::from_secs(10));
//!
//! let pool = Pool::new(manager, config).await?;
//! let conn = pool.get().await?;
//! // Use connection...
//! // Connection automatically rolled back and returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
mod idle;
pub mod lifecycle;
pub mod metrics;
pub mod pool;
pub mod registry;

pub use config::PoolConfig;
pub use error::PoolError;
pub use lifecycle::{ConnectionMetadata, ManageConnection};
pub use metrics::PoolMetrics;
pub use pool::{Pool, PoolBuilder, PoolStatus, PooledConnection};
pub use registry::PoolRegistry;
