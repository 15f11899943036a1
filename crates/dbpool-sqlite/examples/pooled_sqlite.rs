//! Pooled SQLite access with metrics.
//!
//! Builds the process-wide registry from the environment, runs a burst of
//! concurrent writers through it and prints pool status along the way.
//!
//! # Running
//!
//! ```bash
//! export DATABASE_PATH=/tmp/pooled_sqlite.db
//! export DB_POOL_MAX_CONNECTIONS=4
//!
//! cargo run -p dbpool-sqlite --example pooled_sqlite
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use dbpool::{PoolError, PoolStatus};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let registry = Arc::new(dbpool_sqlite::registry_from_env()?);

    println!("=== Pooled SQLite Example ===\n");
    println!("Pool configuration:");
    println!("  Max connections: {}", registry.config().max_connections);
    println!("  Acquire timeout: {:?}", registry.config().acquire_timeout);
    println!();

    let pool = registry.get().await?;
    print_pool_status(&pool.status());

    // Example 1: Basic usage
    println!("\n1. Basic usage:");
    {
        let conn = pool.get().await?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS visits (id INTEGER PRIMARY KEY, worker INTEGER NOT NULL);",
        )?;
        let version: String = conn.query_row("SELECT sqlite_version()", [], |r| r.get(0))?;
        println!("  SQLite version: {version}");
        // Connection is returned to the pool when dropped
    }

    // Example 2: Abandoned transaction
    println!("\n2. Abandoned transaction is rolled back on release:");
    {
        let conn = pool.get().await?;
        conn.execute_batch("BEGIN; INSERT INTO visits (worker) VALUES (-1);")?;
    }
    {
        let conn = pool.get().await?;
        let stray: i64 =
            conn.query_row("SELECT count(*) FROM visits WHERE worker = -1", [], |r| r.get(0))?;
        println!("  Rows left behind: {stray}");
    }

    // Example 3: Concurrent usage through the registry
    println!("\n3. Concurrent writers (20 tasks):");
    let start = Instant::now();
    let mut handles = vec![];
    for i in 0..20_i64 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let conn = registry.acquire().await?;
            conn.execute("INSERT INTO visits (worker) VALUES (?1)", [i])
                .map_err(|e| PoolError::ConnectionCreation(e.to_string()))?;
            Ok::<_, PoolError>(i)
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => completed += 1,
            Err(e) if e.is_exhausted() => println!("  Pool exhausted: {e}"),
            Err(e) => println!("  Worker failed: {e}"),
        }
    }
    println!("  Completed {completed} writes in {:?}", start.elapsed());

    let metrics = pool.metrics();
    println!("\n4. Pool metrics:");
    println!("  Connections created: {}", metrics.connections_created);
    println!("  Connections closed: {}", metrics.connections_closed);
    println!("  Successful checkouts: {}", metrics.checkouts_successful);
    println!("  Timed out checkouts: {}", metrics.checkouts_timed_out);
    println!("  Success rate: {:.1}%", metrics.checkout_success_rate() * 100.0);
    println!("  Average wait: {:?}", metrics.average_wait());
    print_pool_status(&pool.status());

    registry.shutdown().await;
    println!("\nRegistry shut down.");

    Ok(())
}

fn print_pool_status(status: &PoolStatus) {
    println!(
        "  Status: live={} idle={} in_use={} max={} ({:.1}% utilized)",
        status.live,
        status.idle,
        status.in_use,
        status.max,
        status.utilization()
    );
}
