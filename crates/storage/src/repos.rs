use sqlx::{FromRow, Row};

use crate::{error::DbError, models::ChartConfig, pool::Database};

// ─── Chart Config Queries ───────────────────────────────────────────────────

/// Get all chart configs, oldest first.
pub async fn list_chart_configs(db: &Database) -> Result<Vec<ChartConfig>, DbError> {
    let rows = db
        .query(sqlx::query(
            "SELECT id, type, title, data_source_id, options, position, created_at, updated_at \
             FROM chart_configs ORDER BY id",
        ))
        .await?;
    rows.iter()
        .map(|row| ChartConfig::from_row(row).map_err(DbError::Query))
        .collect()
}

/// Get a single chart config by id.
pub async fn get_chart_config(db: &Database, id: i32) -> Result<Option<ChartConfig>, DbError> {
    let rows = db
        .query(
            sqlx::query(
                "SELECT id, type, title, data_source_id, options, position, created_at, updated_at \
                 FROM chart_configs WHERE id = $1",
            )
            .bind(id),
        )
        .await?;
    rows.first()
        .map(|row| ChartConfig::from_row(row).map_err(DbError::Query))
        .transpose()
}

/// Number of chart configs.
pub async fn count_chart_configs(db: &Database) -> Result<i64, DbError> {
    let rows = db
        .query(sqlx::query("SELECT COUNT(*) FROM chart_configs"))
        .await?;
    scalar(&rows)
}

// ─── Catalog Queries ────────────────────────────────────────────────────────

/// Names of the tables in the connection's current schema.
pub async fn list_tables(db: &Database) -> Result<Vec<String>, DbError> {
    let rows = db
        .query(sqlx::query(
            "SELECT table_name::TEXT FROM information_schema.tables \
             WHERE table_schema = current_schema() ORDER BY table_name",
        ))
        .await?;
    rows.iter()
        .map(|row| row.try_get(0).map_err(DbError::Query))
        .collect()
}

/// PostgreSQL server version string.
pub async fn server_version(db: &Database) -> Result<String, DbError> {
    let rows = db.query(sqlx::query("SELECT version()")).await?;
    scalar(&rows)
}

fn scalar<T>(rows: &[sqlx::postgres::PgRow]) -> Result<T, DbError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    let row = rows
        .first()
        .ok_or(DbError::Query(sqlx::Error::RowNotFound))?;
    row.try_get(0).map_err(DbError::Query)
}
