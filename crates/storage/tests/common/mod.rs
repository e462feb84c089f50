//! Shared setup for the database-backed tests.
//!
//! These tests require a running PostgreSQL database. Set `TEST_DATABASE_URL`
//! to run them; without it every test returns early.

#![allow(dead_code)]

use std::{str::FromStr, time::Duration};

use sqlx::{Connection, PgConnection, postgres::PgConnectOptions};
use vibedash_core::DbSettings;
use vibedash_storage::{Database, PoolStats};

/// A pool whose `search_path` points at a private, throwaway schema.
pub struct TestDb {
    pub db: Database,
    pub settings: DbSettings,
    url: String,
    schema: String,
}

impl TestDb {
    /// Returns `None` (and says so) when no test database is configured.
    pub async fn new(max_connections: u32) -> Option<Self> {
        Self::with_settings(|s| s.max_connections = max_connections).await
    }

    /// Like [`TestDb::new`], with `adjust` applied to the pool settings
    /// before the pool is built.
    pub async fn with_settings(adjust: impl FnOnce(&mut DbSettings)) -> Option<Self> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping database test");
            return None;
        };

        let schema = format!("test_{}", uuid::Uuid::new_v4().simple());
        let mut admin = PgConnection::connect(&url).await.expect("connect admin");
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&mut admin)
            .await
            .expect("create test schema");
        admin.close().await.ok();

        let mut settings = DbSettings {
            url: Some(url.clone()),
            min_connections: 1,
            acquire_timeout: Duration::from_millis(500),
            close_timeout: Duration::from_millis(500),
            ..DbSettings::default()
        };
        adjust(&mut settings);
        let options = PgConnectOptions::from_str(&url)
            .expect("parse TEST_DATABASE_URL")
            .options([("search_path", schema.as_str())]);
        let db = Database::connect_with(options, &settings)
            .await
            .expect("connect pool");

        Some(Self {
            db,
            settings,
            url,
            schema,
        })
    }

    /// Close the pool and drop the private schema.
    pub async fn teardown(self) {
        self.db.close_pool().await;
        let mut admin = PgConnection::connect(&self.url).await.expect("connect admin");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&mut admin)
            .await
            .expect("drop test schema");
        admin.close().await.ok();
    }
}

/// Wait until every open connection is back in the idle set, or give up
/// after 2s. Dropped connections return to the pool asynchronously.
pub async fn wait_until_idle(db: &Database) -> PoolStats {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = db.pool_stats();
        if stats.idle == stats.total || tokio::time::Instant::now() >= deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
