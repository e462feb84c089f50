//! Pool manager behaviour against a live database.

mod common;

use std::time::{Duration, Instant};

use common::{TestDb, wait_until_idle};
use vibedash_storage::{DbError, Row};

#[tokio::test]
async fn test_connection_and_stats() {
    let Some(t) = TestDb::new(2).await else { return };

    assert!(t.db.test_connection().await);
    let stats = wait_until_idle(&t.db).await;
    assert!(stats.total >= 1 && stats.total <= 2, "{stats:?}");
    assert_eq!(stats.waiting, 0);

    t.teardown().await;
}

#[tokio::test]
async fn query_releases_connection_when_statement_fails() {
    let Some(t) = TestDb::new(2).await else { return };

    t.db.query(sqlx::query("SELECT 1")).await.unwrap();
    let baseline = wait_until_idle(&t.db).await;

    let err = t.db.query(sqlx::query("SELEC 1")).await.err().unwrap();
    assert!(matches!(err, DbError::Query(_)), "{err}");
    assert_eq!(err.code().as_deref(), Some("42601"));

    let after = wait_until_idle(&t.db).await;
    assert_eq!(after.idle, after.total);
    assert_eq!(after.total, baseline.total);

    t.teardown().await;
}

#[tokio::test]
async fn parameter_count_mismatch_is_a_query_error() {
    let Some(t) = TestDb::new(2).await else { return };

    let err = t
        .db
        .query(sqlx::query("SELECT $1::INT + $2::INT").bind(1_i32))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DbError::Query(_)), "{err}");
    assert!(!err.is_retryable());

    let rows = t
        .db
        .query(sqlx::query("SELECT $1::INT + $2::INT AS sum").bind(1_i32).bind(2_i32))
        .await
        .unwrap();
    assert_eq!(rows[0].get::<i32, _>("sum"), 3);

    t.teardown().await;
}

#[tokio::test]
async fn pool_never_exceeds_max_under_load() {
    let Some(t) = TestDb::new(2).await else { return };

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let db = t.db.clone();
            tokio::spawn(async move { db.execute(sqlx::query("SELECT pg_sleep(0.05)")).await })
        })
        .collect();

    let mut peak_total = 0;
    let mut saw_waiters = false;
    while tasks.iter().any(|h| !h.is_finished()) {
        let stats = t.db.pool_stats();
        peak_total = peak_total.max(stats.total);
        saw_waiters |= stats.waiting > 0;
        assert!(stats.total <= 2, "{stats:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(peak_total <= 2);
    assert!(saw_waiters);
    assert_eq!(t.db.pool_stats().waiting, 0);

    t.teardown().await;
}

#[tokio::test]
async fn saturated_pool_times_out_acquisition() {
    let Some(t) = TestDb::new(2).await else { return };

    let first = t.db.acquire_client().await.unwrap();
    let second = t.db.acquire_client().await.unwrap();

    let start = Instant::now();
    let err = t.db.acquire_client().await.err().unwrap();
    let elapsed = start.elapsed();

    assert!(matches!(err, DbError::AcquireTimeout(_)), "{err}");
    assert!(err.is_retryable());
    assert!(elapsed >= Duration::from_millis(450), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_500), "{elapsed:?}");

    first.release();
    let third = t.db.acquire_client().await.unwrap();
    third.release();
    second.release();

    let stats = wait_until_idle(&t.db).await;
    assert_eq!(stats.idle, stats.total);

    t.teardown().await;
}

#[tokio::test]
async fn client_transaction_runs_in_order() {
    let Some(t) = TestDb::new(2).await else { return };

    let mut client = t.db.acquire_client().await.unwrap();
    client
        .execute(sqlx::query("CREATE TEMP TABLE steps (n INT)"))
        .await
        .unwrap();
    {
        let mut tx = client.begin().await.unwrap();
        for n in 1..=3 {
            sqlx::query("INSERT INTO steps (n) VALUES ($1)")
                .bind(n)
                .execute(&mut *tx)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
    }
    {
        // Rolled back on drop.
        let mut tx = client.begin().await.unwrap();
        sqlx::query("INSERT INTO steps (n) VALUES (99)")
            .execute(&mut *tx)
            .await
            .unwrap();
    }

    let rows = client
        .query(sqlx::query("SELECT n FROM steps ORDER BY n"))
        .await
        .unwrap();
    let values: Vec<i32> = rows.iter().map(|r| r.get("n")).collect();
    assert_eq!(values, [1, 2, 3]);
    client.release();

    let stats = wait_until_idle(&t.db).await;
    assert_eq!(stats.idle, stats.total);

    t.teardown().await;
}

#[tokio::test]
async fn cancelled_query_releases_its_connection() {
    let Some(t) = TestDb::new(1).await else { return };

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        t.db.query(sqlx::query("SELECT pg_sleep(1)")),
    )
    .await;
    assert!(cancelled.is_err(), "query should have been cut off");

    let stats = wait_until_idle(&t.db).await;
    assert_eq!(stats.idle, stats.total, "{stats:?}");
    assert_eq!(stats.waiting, 0);

    let rows = t
        .db
        .query(sqlx::query("SELECT 1::INT AS one"))
        .await
        .unwrap();
    assert_eq!(rows[0].get::<i32, _>("one"), 1);

    t.teardown().await;
}

#[tokio::test]
async fn idle_connections_above_min_are_reaped() {
    let Some(t) = TestDb::with_settings(|s| {
        s.min_connections = 1;
        s.max_connections = 3;
        s.idle_timeout = Duration::from_millis(300);
    })
    .await
    else {
        return;
    };

    let clients = [
        t.db.acquire_client().await.unwrap(),
        t.db.acquire_client().await.unwrap(),
        t.db.acquire_client().await.unwrap(),
    ];
    assert_eq!(t.db.pool_stats().total, 3);
    for client in clients {
        client.release();
    }
    let stats = wait_until_idle(&t.db).await;
    assert_eq!(stats.idle, stats.total);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let stats = t.db.pool_stats();
    assert_eq!(stats.total, 1, "{stats:?}");
    assert_eq!(stats.idle, 1, "{stats:?}");

    t.teardown().await;
}

#[tokio::test]
async fn close_with_unreleased_client_is_bounded() {
    let Some(t) = TestDb::new(2).await else { return };

    let leaked = t.db.acquire_client().await.unwrap();

    let start = Instant::now();
    t.db.close_pool().await;
    assert!(start.elapsed() < Duration::from_millis(1_500));

    assert!(matches!(
        t.db.query(sqlx::query("SELECT 1")).await,
        Err(DbError::PoolClosed)
    ));

    drop(leaked);
    t.teardown().await;
}
