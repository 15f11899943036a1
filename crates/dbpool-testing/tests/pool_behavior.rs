//! Pool behavior tests against the mock backing resource.
//!
//! Timing-sensitive tests run with tokio's clock paused, so a 30 second
//! acquire timeout costs nothing and elapsed times are exact.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dbpool::{Pool, PoolConfig, PoolError};
use dbpool_testing::fixtures::{assert_bounds, fast_config, init_tracing};
use dbpool_testing::{MockConnection, MockManager};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

async fn mock_pool(config: PoolConfig) -> (Pool<MockManager>, MockManager) {
    init_tracing();
    let manager = MockManager::new("mock://app.db");
    let pool = Pool::new(manager.clone(), config)
        .await
        .expect("pool should build");
    (pool, manager)
}

// =============================================================================
// Construction
// =============================================================================

#[tokio::test]
async fn test_prewarm_opens_half_of_max() {
    let (pool, manager) = mock_pool(PoolConfig::new().max_connections(10)).await;

    let status = pool.status();
    assert_eq!(status.live, 5);
    assert_eq!(status.idle, 5);
    assert_eq!(status.available, 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.max, 10);
    assert_eq!(manager.connects(), 5);
    assert_eq!(pool.target(), "mock://app.db");
}

#[tokio::test]
async fn test_prewarm_at_least_one() {
    let (pool, _manager) = mock_pool(PoolConfig::new().max_connections(1)).await;
    assert_eq!(pool.status().live, 1);
}

#[tokio::test(start_paused = true)]
async fn test_prewarm_failures_are_tolerated() {
    init_tracing();
    let manager = MockManager::default();
    manager.refuse_connects(true);

    let pool = Pool::new(manager.clone(), PoolConfig::new().max_connections(4))
        .await
        .expect("pre-warm failures must not fail construction");
    assert_eq!(pool.status().live, 0);
    assert_eq!(manager.failed_connects(), 2);

    manager.refuse_connects(false);
    let conn = pool.get().await.expect("lazy creation should work");
    assert_eq!(pool.status().live, 1);
    drop(conn);
}

#[tokio::test]
async fn test_zero_max_connections_rejected() {
    let result = Pool::new(MockManager::default(), PoolConfig::new().max_connections(0)).await;
    assert!(matches!(result, Err(PoolError::Configuration(_))));
}

#[tokio::test]
async fn test_builder_matches_config() {
    let pool = Pool::builder(MockManager::default())
        .max_connections(3)
        .prewarm(3)
        .acquire_timeout(Duration::from_secs(2))
        .idle_wait(Duration::ZERO)
        .build()
        .await
        .unwrap();

    assert_eq!(pool.config().max_connections, 3);
    assert_eq!(pool.config().acquire_timeout, Duration::from_secs(2));
    assert_eq!(pool.status().idle, 3);
    assert_eq!(pool.generation(), 0);
}

// =============================================================================
// Acquire / release
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scenario_waiter_receives_released_connection() {
    let (pool, _manager) = mock_pool(PoolConfig::new().max_connections(2)).await;
    assert_eq!(pool.status().live, 1, "pre-warm opens one connection");

    let first = pool.get().await.unwrap();
    assert_eq!(pool.status().live, 1);
    let first_handle = first.handle();

    let second = pool.get().await.unwrap();
    assert_eq!(pool.status().live, 2, "second acquire grows the pool");
    assert_ne!(second.handle(), first_handle);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let conn = pool.get().await?;
            Ok::<_, PoolError>((conn.handle(), started.elapsed()))
        })
    };

    // Let the third acquire block at capacity.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!waiter.is_finished());
    assert_eq!(pool.status().live, 2);

    drop(first);

    let (handle, waited) = waiter.await.unwrap().expect("waiter should get a connection");
    assert_eq!(handle, first_handle);
    assert!(waited < pool.config().acquire_timeout);
    assert_eq!(pool.status().live, 2);
    drop(second);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_at_capacity_times_out() {
    let (pool, _manager) = mock_pool(PoolConfig::new().max_connections(1)).await;
    let _held = pool.get().await.unwrap();

    let started = Instant::now();
    let err = assert_err!(pool.get().await);
    let waited = started.elapsed();

    assert!(err.is_exhausted(), "unexpected error: {err:?}");
    assert!(waited >= Duration::from_secs(30));
    assert!(waited < Duration::from_secs(31));

    let metrics = pool.metrics();
    assert_eq!(metrics.checkouts_timed_out, 1);
    assert_eq!(metrics.checkouts_failed, 1);
    assert_eq!(pool.status().live, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_get_distinct_connections() {
    let config = fast_config(4).acquire_timeout(Duration::from_secs(10));
    let (pool, manager) = mock_pool(config).await;
    let in_use: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let pool = pool.clone();
        let in_use = Arc::clone(&in_use);
        handles.push(tokio::spawn(async move {
            let conn = pool.get().await.expect("acquire should succeed");
            let handle = conn.handle();
            assert!(in_use.lock().insert(handle), "handle {handle} handed out twice");
            assert!(pool.status().live <= 4);

            tokio::time::sleep(Duration::from_millis(2)).await;

            in_use.lock().remove(&handle);
            drop(conn);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let status = assert_bounds(&pool);
    assert_eq!(status.in_use, 0);
    assert!(manager.connects() <= 4);
    assert_eq!(pool.metrics().checkouts_successful, 32);
}

#[tokio::test]
async fn test_connection_reuse() {
    let (pool, manager) = mock_pool(fast_config(2)).await;

    let conn = pool.get().await.unwrap();
    let handle = conn.handle();
    let id = conn.metadata().id;
    drop(conn);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.handle(), handle, "should reuse the idle connection");
    assert_eq!(conn.metadata().id, id);
    assert_eq!(conn.metadata().checkout_count, 2);
    assert_eq!(manager.connects(), 1);
}

#[tokio::test]
async fn test_status_tracking() {
    let (pool, _manager) = mock_pool(fast_config(4).prewarm(0)).await;

    let status = pool.status();
    assert_eq!((status.live, status.idle, status.in_use), (0, 0, 0));

    let conn1 = pool.get().await.unwrap();
    let conn2 = pool.get().await.unwrap();
    let status = pool.status();
    assert_eq!((status.live, status.idle, status.in_use), (2, 0, 2));
    assert!((status.utilization() - 50.0).abs() < f64::EPSILON);

    drop(conn1);
    let status = pool.status();
    assert_eq!((status.live, status.idle, status.in_use), (2, 1, 1));

    drop(conn2);
    let status = pool.status();
    assert_eq!((status.live, status.idle, status.in_use), (2, 2, 0));
    assert!(!status.is_at_capacity());
}

#[tokio::test(start_paused = true)]
async fn test_connection_creation_error_is_surfaced() {
    let (pool, manager) = mock_pool(PoolConfig::new().max_connections(2).prewarm(0)).await;
    manager.refuse_connects(true);

    let err = assert_err!(pool.get().await);
    assert!(matches!(err, PoolError::ConnectionCreation(_)), "unexpected error: {err:?}");
    assert!(!err.is_exhausted());
    assert_eq!(pool.status().live, 0, "failed creation must release its slot");
}

#[tokio::test]
async fn test_with_connection_returns_connection() {
    let (pool, _manager) = mock_pool(fast_config(2)).await;

    let handle = pool
        .with_connection(|conn: &mut MockConnection| {
            conn.execute("UPDATE settings SET value = 1");
            conn.handle()
        })
        .await
        .unwrap();

    assert!(handle > 0);
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn test_connection_returned_on_panic() {
    let (pool, _manager) = mock_pool(fast_config(1)).await;

    let task = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut conn = pool.get().await.unwrap();
            conn.begin();
            conn.execute("INSERT INTO tasks VALUES (1)");
            if conn.has_uncommitted() {
                panic!("handler failed mid-transaction");
            }
        })
    };
    assert!(task.await.unwrap_err().is_panic());

    let status = pool.status();
    assert_eq!((status.live, status.idle), (1, 1));
    let conn = pool.get().await.unwrap();
    assert!(!conn.has_uncommitted());
}

// =============================================================================
// Health check
// =============================================================================

#[tokio::test]
async fn test_broken_idle_connection_is_replaced() {
    let (pool, manager) = mock_pool(fast_config(2)).await;
    assert_eq!(pool.status().live, 1);

    manager.break_all();
    let broken: Vec<u64> = (1..=manager.connects()).collect();

    let conn = pool.get().await.unwrap();
    assert!(!broken.contains(&conn.handle()), "got a broken handle back");
    assert_eq!(pool.status().live, 1, "one destroyed, one created");
    for handle in broken {
        assert!(!manager.is_open(handle));
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.health_checks_failed, 1);
    assert_eq!(metrics.connections_created, 2);
    assert_eq!(metrics.connections_closed, 1);
}

#[tokio::test]
async fn test_failed_replacement_surfaces_creation_error() {
    let (pool, manager) = mock_pool(fast_config(2)).await;
    manager.break_all();
    manager.fail_next_connects(1);

    let err = assert_err!(pool.get().await);
    assert!(matches!(err, PoolError::ConnectionCreation(_)));
    assert_eq!(pool.status().live, 0);
    assert_eq!(manager.open_handles(), 0);
}

#[tokio::test]
async fn test_fresh_connections_are_not_health_checked() {
    let (pool, manager) = mock_pool(fast_config(2).prewarm(0)).await;

    let conn = pool.get().await.unwrap();
    assert_eq!(manager.health_checks(), 0);
    drop(conn);

    let _conn = pool.get().await.unwrap();
    assert_eq!(manager.health_checks(), 1, "idle connections are checked");
}

#[tokio::test]
async fn test_health_check_can_be_disabled() {
    let (pool, manager) = mock_pool(fast_config(2).test_on_checkout(false)).await;
    manager.break_all();

    let conn = pool.get().await.unwrap();
    assert_eq!(manager.health_checks(), 0);
    assert_eq!(conn.handle(), 1);
}

// =============================================================================
// Release hygiene
// =============================================================================

#[tokio::test]
async fn test_release_rolls_back_uncommitted_state() {
    let (pool, manager) = mock_pool(fast_config(1)).await;

    let mut conn = pool.get().await.unwrap();
    let handle = conn.handle();
    conn.begin();
    conn.execute("INSERT INTO articles VALUES ('draft')");
    assert!(conn.has_uncommitted());
    drop(conn);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.handle(), handle);
    assert!(!conn.has_uncommitted());
    assert_eq!(conn.committed(), 0);
    assert_eq!(manager.resets(), 1);
}

#[tokio::test]
async fn test_committed_work_survives_release() {
    let (pool, _manager) = mock_pool(fast_config(1)).await;

    let mut conn = pool.get().await.unwrap();
    conn.begin();
    conn.execute("INSERT INTO articles VALUES ('published')");
    conn.commit();
    drop(conn);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.committed(), 1);
}

#[tokio::test]
async fn test_reset_failure_returns_connection_by_default() {
    let (pool, manager) = mock_pool(fast_config(2)).await;
    manager.fail_resets(true);

    let conn = pool.get().await.unwrap();
    drop(conn);

    let status = pool.status();
    assert_eq!((status.live, status.idle), (1, 1));
    assert_eq!(pool.metrics().resets_failed, 1);
}

#[tokio::test]
async fn test_reset_failure_discards_when_configured() {
    let (pool, manager) = mock_pool(fast_config(2).discard_on_reset_failure(true)).await;
    manager.fail_resets(true);

    let conn = pool.get().await.unwrap();
    let handle = conn.handle();
    drop(conn);

    let status = pool.status();
    assert_eq!((status.live, status.idle), (0, 0));
    assert!(!manager.is_open(handle));
}

#[tokio::test]
async fn test_invalid_connection_is_discarded_on_release() {
    let (pool, manager) = mock_pool(fast_config(2)).await;

    let mut conn = pool.get().await.unwrap();
    let handle = conn.handle();
    conn.invalidate();
    drop(conn);

    assert_eq!(pool.status().live, 0);
    assert!(!manager.is_open(handle));
    assert_eq!(pool.metrics().connections_closed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_discard_wakes_waiter_to_create() {
    let (pool, _manager) = mock_pool(PoolConfig::new().max_connections(1)).await;
    let mut held = pool.get().await.unwrap();
    held.invalidate();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let conn = pool.get().await?;
            Ok::<_, PoolError>((conn.handle(), started.elapsed()))
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    let held_handle = held.handle();
    drop(held);

    let (handle, waited) = waiter.await.unwrap().unwrap();
    assert_ne!(handle, held_handle);
    assert!(waited < Duration::from_secs(2));
    assert_eq!(pool.status().live, 1);
}

#[tokio::test]
async fn test_detach_frees_slot() {
    let (pool, manager) = mock_pool(fast_config(1)).await;

    let conn = pool.get().await.unwrap();
    let detached = conn.detach().expect("should detach connection");
    assert_eq!(pool.status().live, 0);
    assert!(manager.is_open(detached.handle()));

    // The freed slot lets the pool open another connection.
    let other = pool.get().await.unwrap();
    assert_ne!(other.handle(), detached.handle());

    let handle = detached.handle();
    drop(detached);
    assert!(!manager.is_open(handle));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_releases_its_slot() {
    let config = PoolConfig::new()
        .max_connections(1)
        .prewarm(0)
        .idle_wait(Duration::ZERO);
    let (pool, manager) = mock_pool(config).await;
    manager.connect_delay(Some(Duration::from_secs(10)));

    let result = tokio::time::timeout(Duration::from_secs(1), pool.get()).await;
    assert!(result.is_err(), "outer timeout should fire first");
    assert_eq!(pool.status().live, 0);

    manager.connect_delay(None);
    let conn = assert_ok!(pool.get().await);
    assert_eq!(pool.status().live, 1);
    drop(conn);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_leaves_pool_consistent() {
    let (pool, _manager) = mock_pool(PoolConfig::new().max_connections(1)).await;
    let held = pool.get().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), pool.get()).await;
    assert!(result.is_err());

    drop(held);
    let status = pool.status();
    assert_eq!((status.live, status.idle), (1, 1));
    assert_ok!(pool.get().await);
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_is_idempotent() {
    let (pool, manager) = mock_pool(PoolConfig::new().max_connections(4)).await;
    assert_eq!(manager.open_handles(), 2);

    pool.close().await;
    pool.close().await;

    assert!(pool.is_closed());
    let status = pool.status();
    assert_eq!((status.live, status.idle), (0, 0));
    assert_eq!(manager.open_handles(), 0);

    let err = assert_err!(pool.get().await);
    assert!(matches!(err, PoolError::PoolClosed));
}

#[tokio::test]
async fn test_late_release_after_close_is_discarded() {
    let (pool, manager) = mock_pool(fast_config(2)).await;
    let conn = pool.get().await.unwrap();
    let handle = conn.handle();

    pool.close().await;
    assert_eq!(pool.status().live, 0);
    assert!(manager.is_open(handle), "checked-out connections stay usable");

    drop(conn);
    let status = pool.status();
    assert_eq!((status.live, status.idle), (0, 0));
    assert!(!manager.is_open(handle));
}

#[tokio::test(start_paused = true)]
async fn test_close_wakes_pending_acquires() {
    let (pool, _manager) = mock_pool(PoolConfig::new().max_connections(1)).await;
    let _held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            (pool.get().await.map(|_| ()), started.elapsed())
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    pool.close().await;

    let (result, waited) = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::PoolClosed)));
    assert!(waited < Duration::from_secs(2));
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn test_metrics_after_churn() {
    let (pool, _manager) = mock_pool(fast_config(5)).await;

    for _ in 0..5 {
        let conn = pool.get().await.unwrap();
        drop(conn);
    }

    let metrics = pool.metrics();
    assert!(metrics.connections_created >= 1);
    assert_eq!(metrics.checkouts_successful, 5);
    assert_eq!(metrics.checkouts_failed, 0);
    assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
}
