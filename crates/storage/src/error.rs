use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the pool manager and the schema bootstrapper.
#[derive(Debug, Error)]
pub enum DbError {
    /// Every connection stayed checked out for the whole acquire timeout.
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    /// The statement reached the database and failed there (or its result
    /// could not be decoded).
    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),

    /// The pool has been shut down.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// A connection could not be established.
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Table {0} not found after creation")]
    MissingTable(String),

    /// A bootstrap step failed. Steps before `index` stay applied.
    #[error("Schema step {index} ({step}) failed: {source}")]
    SchemaInit {
        index: usize,
        step: String,
        #[source]
        source: Box<DbError>,
    },
}

impl DbError {
    /// Classify an error returned while waiting on the pool.
    pub(crate) fn from_acquire(err: sqlx::Error, timeout: Duration) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::AcquireTimeout(timeout),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            other => DbError::Connection(other),
        }
    }

    pub(crate) fn schema_step(index: usize, step: impl Into<String>, source: DbError) -> Self {
        DbError::SchemaInit {
            index,
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Only acquisition timeouts are worth a backoff-and-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::AcquireTimeout(_))
    }

    /// SQLSTATE code of the underlying database error, if any.
    pub fn code(&self) -> Option<String> {
        self.database_error()
            .and_then(|e| e.code())
            .map(|c| c.into_owned())
    }

    /// Name of the violated constraint, if the database reported one.
    pub fn constraint(&self) -> Option<&str> {
        self.database_error().and_then(|e| e.constraint())
    }

    fn database_error(&self) -> Option<&dyn sqlx::error::DatabaseError> {
        match self {
            DbError::Query(sqlx::Error::Database(e)) => Some(e.as_ref()),
            DbError::SchemaInit { source, .. } => source.database_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_errors_are_classified() {
        let timeout = Duration::from_millis(2000);

        let err = DbError::from_acquire(sqlx::Error::PoolTimedOut, timeout);
        assert!(matches!(err, DbError::AcquireTimeout(t) if t == timeout));
        assert!(err.is_retryable());

        let err = DbError::from_acquire(sqlx::Error::PoolClosed, timeout);
        assert!(matches!(err, DbError::PoolClosed));
        assert!(!err.is_retryable());

        let err = DbError::from_acquire(sqlx::Error::WorkerCrashed, timeout);
        assert!(matches!(err, DbError::Connection(_)));
    }

    #[test]
    fn schema_errors_carry_the_step() {
        let err = DbError::schema_step(3, "create trigger", DbError::PoolClosed);
        assert_eq!(
            err.to_string(),
            "Schema step 3 (create trigger) failed: Connection pool is closed"
        );
        assert!(!err.is_retryable());
        assert!(err.code().is_none());
        assert!(err.constraint().is_none());
    }
}
