pub mod error;
pub mod models;
pub mod pool;
pub mod repos;
pub mod schema;

pub use error::DbError;
pub use pool::{Database, DbClient, PgQuery, PoolStats};
pub use schema::{SchemaDescriptor, SchemaReport, SchemaStep, drop_schema, ensure_schema};

pub use sqlx::Row;
pub use sqlx::postgres::PgRow;

use vibedash_core::DbSettings;

/// Connect to PostgreSQL with a production-ready connection pool.
pub async fn connect(settings: &DbSettings) -> Result<Database, DbError> {
    Database::connect(settings).await
}
