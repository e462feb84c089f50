//! Bounded PostgreSQL connection pool with logged query execution.

use std::{
    ops::{Deref, DerefMut},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{
    Connection, Execute, PgConnection, Postgres, Row, Transaction,
    pool::PoolConnection,
    postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow},
    query::Query,
};
use vibedash_core::DbSettings;

use crate::error::DbError;

/// A parameterised statement: `sqlx::query("... $1 ...").bind(value)`.
pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections, idle plus checked out.
    pub total: u32,
    pub idle: u32,
    /// Callers currently waiting for a connection.
    pub waiting: u32,
}

struct Shared {
    waiting: AtomicUsize,
    closed: AtomicBool,
    acquire_timeout: Duration,
    close_timeout: Duration,
}

/// Handle to the connection pool. Cheap to clone; every clone shares the
/// same connections.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    shared: Arc<Shared>,
}

/// Translate settings into driver connect options.
pub fn connect_options(settings: &DbSettings) -> Result<PgConnectOptions, DbError> {
    match &settings.url {
        Some(url) => PgConnectOptions::from_str(url).map_err(DbError::Connection),
        None => Ok(PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database)),
    }
}

fn pool_options(settings: &DbSettings) -> PgPoolOptions {
    PgPoolOptions::new()
        .min_connections(settings.min_connections)
        .max_connections(settings.max_connections)
        .idle_timeout(settings.idle_timeout)
        .acquire_timeout(settings.acquire_timeout)
}

impl Database {
    /// Build the pool and open a first connection, failing fast when the
    /// database is unreachable.
    pub async fn connect(settings: &DbSettings) -> Result<Self, DbError> {
        let options = connect_options(settings)?;
        Self::connect_with(options, settings).await
    }

    /// Build the pool without touching the network. Connections are opened
    /// on first use.
    pub fn connect_lazy(settings: &DbSettings) -> Result<Self, DbError> {
        let options = connect_options(settings)?;
        Ok(Self::connect_lazy_with(options, settings))
    }

    pub async fn connect_with(
        options: PgConnectOptions,
        settings: &DbSettings,
    ) -> Result<Self, DbError> {
        let pool = pool_options(settings)
            .connect_with(options)
            .await
            .map_err(|e| DbError::from_acquire(e, settings.acquire_timeout))?;

        tracing::info!(
            target_db = %settings.target(),
            min = settings.min_connections,
            max = settings.max_connections,
            "Database pool connected"
        );
        Ok(Self::wrap(pool, settings))
    }

    pub fn connect_lazy_with(options: PgConnectOptions, settings: &DbSettings) -> Self {
        let pool = pool_options(settings).connect_lazy_with(options);
        tracing::debug!(target_db = %settings.target(), "Database pool created (lazy)");
        Self::wrap(pool, settings)
    }

    fn wrap(pool: PgPool, settings: &DbSettings) -> Self {
        Self {
            pool,
            shared: Arc::new(Shared {
                waiting: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                acquire_timeout: settings.acquire_timeout,
                close_timeout: settings.close_timeout,
            }),
        }
    }

    // ─── Acquisition ────────────────────────────────────────────────────────

    async fn acquire(&self) -> Result<PoolConnection<Postgres>, DbError> {
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let _waiting = WaitingGuard::enter(&self.shared.waiting);
        self.pool.acquire().await.map_err(|e| {
            let err = DbError::from_acquire(e, self.shared.acquire_timeout);
            match &err {
                DbError::AcquireTimeout(t) => {
                    tracing::warn!(timeout_ms = t.as_millis() as u64, "Connection pool exhausted")
                }
                DbError::Connection(e) => {
                    tracing::error!(error = %e, "Failed to open database connection")
                }
                _ => {}
            }
            err
        })
    }

    /// Check out a connection for exclusive use, e.g. a multi-statement
    /// transaction. The connection goes back to the pool on
    /// [`DbClient::release`] or when the client is dropped.
    pub async fn acquire_client(&self) -> Result<DbClient, DbError> {
        let conn = self.acquire().await?;
        Ok(DbClient { conn })
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    /// Run a statement and return its rows. The implicitly acquired
    /// connection is released on every exit path.
    pub async fn query(&self, query: PgQuery<'_>) -> Result<Vec<PgRow>, DbError> {
        let mut conn = self.acquire().await?;
        fetch_logged(&mut conn, query).await
    }

    /// Run a statement and return the number of affected rows.
    pub async fn execute(&self, query: PgQuery<'_>) -> Result<u64, DbError> {
        let mut conn = self.acquire().await?;
        execute_logged(&mut conn, query).await
    }

    /// Round-trip a trivial statement and return the server clock.
    pub async fn ping(&self) -> Result<DateTime<Utc>, DbError> {
        let rows = self
            .query(sqlx::query("SELECT NOW() AS current_time"))
            .await?;
        let row = rows
            .first()
            .ok_or(DbError::Query(sqlx::Error::RowNotFound))?;
        row.try_get("current_time").map_err(DbError::Query)
    }

    /// Health probe. Never fails; any error reads as `false`.
    pub async fn test_connection(&self) -> bool {
        match self.ping().await {
            Ok(now) => {
                tracing::debug!(server_time = %now, "Database connection test successful");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Database connection test failed");
                false
            }
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            total: self.pool.size(),
            idle: self.pool.num_idle() as u32,
            waiting: self.shared.waiting.load(Ordering::Acquire) as u32,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) || self.pool.is_closed()
    }

    /// Stop handing out connections and close the open ones.
    ///
    /// Waits up to the configured close timeout for checked-out connections
    /// to come back; whatever is still out after that is closed when its
    /// holder drops it. A second call is a no-op.
    pub async fn close_pool(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Database pool already closed");
            return;
        }

        let timeout = self.shared.close_timeout;
        match tokio::time::timeout(timeout, self.pool.close()).await {
            Ok(()) => tracing::info!("Database pool closed successfully"),
            Err(_) => {
                let stats = self.pool_stats();
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    checked_out = stats.total.saturating_sub(stats.idle),
                    "Timed out draining database pool; remaining connections close on release"
                );
            }
        }
    }
}

// ─── Exclusive client ───────────────────────────────────────────────────────

/// A checked-out connection. Statements run in submission order.
pub struct DbClient {
    conn: PoolConnection<Postgres>,
}

impl DbClient {
    pub async fn query(&mut self, query: PgQuery<'_>) -> Result<Vec<PgRow>, DbError> {
        fetch_logged(&mut self.conn, query).await
    }

    pub async fn execute(&mut self, query: PgQuery<'_>) -> Result<u64, DbError> {
        execute_logged(&mut self.conn, query).await
    }

    /// Start a transaction on this connection. Dropping it uncommitted rolls
    /// back.
    pub async fn begin(&mut self) -> Result<Transaction<'_, Postgres>, DbError> {
        self.conn.begin().await.map_err(DbError::Query)
    }

    /// Hand the connection back to the pool.
    pub fn release(self) {
        drop(self.conn);
    }
}

impl Deref for DbClient {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for DbClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Counts a caller as waiting until the acquire future completes or is
/// dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) async fn fetch_logged(
    conn: &mut PgConnection,
    query: PgQuery<'_>,
) -> Result<Vec<PgRow>, DbError> {
    let sql = query.sql();
    let start = Instant::now();
    match query.fetch_all(conn).await {
        Ok(rows) => {
            log_success(sql, start, rows.len() as u64);
            Ok(rows)
        }
        Err(e) => Err(log_failure(sql, e)),
    }
}

pub(crate) async fn execute_logged(
    conn: &mut PgConnection,
    query: PgQuery<'_>,
) -> Result<u64, DbError> {
    let sql = query.sql();
    let start = Instant::now();
    match query.execute(conn).await {
        Ok(done) => {
            log_success(sql, start, done.rows_affected());
            Ok(done.rows_affected())
        }
        Err(e) => Err(log_failure(sql, e)),
    }
}

fn log_success(sql: &str, start: Instant, rows: u64) {
    tracing::debug!(
        sql = %compact(sql),
        duration_ms = start.elapsed().as_millis() as u64,
        rows,
        "Executed query"
    );
}

fn log_failure(sql: &str, err: sqlx::Error) -> DbError {
    tracing::error!(sql = %compact(sql), error = %err, "Database query error");
    DbError::Query(err)
}

/// Collapse whitespace so multi-line statements log on one line.
fn compact(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
