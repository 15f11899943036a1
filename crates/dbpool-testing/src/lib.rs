//! # dbpool-testing
//!
//! Test infrastructure for dbpool development.
//!
//! This crate provides a fake backing resource whose failures tests can
//! script, plus small fixtures shared by the pool test-suites.
//!
//! ## Features
//!
//! - [`MockManager`]: refuse connects, break handles, fail rollbacks, slow
//!   connects down
//! - [`MockConnection`]: just enough transaction state to observe rollbacks
//! - Fast pool configuration and a tracing setup for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::Pool;
//! use dbpool_testing::{MockManager, fixtures};
//!
//! #[tokio::test]
//! async fn test_with_mock_manager() {
//!     let manager = MockManager::new("mock://orders");
//!     let pool = Pool::new(manager.clone(), fixtures::fast_config(2)).await.unwrap();
//!
//!     let conn = pool.get().await.unwrap();
//!     manager.break_handle(conn.handle());
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;

pub use mock::{MockConnection, MockManager};
