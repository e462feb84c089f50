//! Idempotent schema bootstrap.
//!
//! A [`SchemaDescriptor`] is an ordered list of [`SchemaStep`]s. Every step
//! tolerates re-execution, so [`ensure_schema`] can be run on every startup
//! and re-run after a failure without manual cleanup.

use serde::Serialize;
use serde_json::json;
use sqlx::{PgConnection, Row, types::Json};

use crate::{
    error::DbError,
    models::{ChartType, Position, SeedRow},
    pool::{Database, DbClient, execute_logged},
};

/// Advisory lock held by each step's transaction, so concurrent bootstraps
/// run their steps one at a time.
const SCHEMA_LOCK_KEY: i64 = 0x7669_6265_6461_7368;

/// Trigger function that stamps `updated_at` on every row modification.
pub const UPDATED_AT_FUNCTION: &str = "update_updated_at_column";

/// Column default for `chart_configs.position`.
pub const DEFAULT_POSITION_JSON: &str = r#"{"x":0,"y":0,"width":6,"height":4}"#;

// ─── Steps ──────────────────────────────────────────────────────────────────

/// One idempotent unit of schema work.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaStep {
    /// `CREATE TABLE IF NOT EXISTS`.
    CreateTable {
        table: &'static str,
        columns: String,
    },
    /// `CREATE OR REPLACE FUNCTION ... RETURNS TRIGGER`.
    CreateFunction {
        name: &'static str,
        body: &'static str,
    },
    /// Drop-then-create of a `BEFORE UPDATE` row trigger.
    CreateTrigger {
        name: String,
        table: &'static str,
        function: &'static str,
    },
    /// `CREATE INDEX IF NOT EXISTS` on a single column.
    CreateIndex {
        name: String,
        table: &'static str,
        column: &'static str,
    },
    /// Inserts each row unless one with the same `(data_source_id, title)`
    /// already exists.
    Seed {
        table: &'static str,
        rows: Vec<SeedRow>,
    },
}

impl SchemaStep {
    pub fn label(&self) -> String {
        match self {
            SchemaStep::CreateTable { table, .. } => format!("create table {table}"),
            SchemaStep::CreateFunction { name, .. } => format!("create function {name}"),
            SchemaStep::CreateTrigger { name, .. } => format!("create trigger {name}"),
            SchemaStep::CreateIndex { name, .. } => format!("create index {name}"),
            SchemaStep::Seed { table, rows } => format!("seed {table} ({} rows)", rows.len()),
        }
    }

    /// Statement text, in execution order. Seed statements take bind
    /// parameters.
    pub fn statements(&self) -> Vec<String> {
        match self {
            SchemaStep::CreateTable { table, columns } => {
                vec![format!("CREATE TABLE IF NOT EXISTS {table} ({columns}\n)")]
            }
            SchemaStep::CreateFunction { name, body } => vec![format!(
                "CREATE OR REPLACE FUNCTION {name}()\nRETURNS TRIGGER AS $$\n{body}\n$$ LANGUAGE plpgsql"
            )],
            SchemaStep::CreateTrigger {
                name,
                table,
                function,
            } => vec![
                format!("DROP TRIGGER IF EXISTS {name} ON {table}"),
                format!(
                    "CREATE TRIGGER {name}\nBEFORE UPDATE ON {table}\nFOR EACH ROW\nEXECUTE FUNCTION {function}()"
                ),
            ],
            SchemaStep::CreateIndex {
                name,
                table,
                column,
            } => vec![format!("CREATE INDEX IF NOT EXISTS {name} ON {table} ({column})")],
            SchemaStep::Seed { table, .. } => vec![format!(
                "INSERT INTO {table} (type, title, data_source_id, options, position)\n\
                 SELECT $1::varchar, $2::varchar, $3::varchar, $4::jsonb, $5::jsonb\n\
                 WHERE NOT EXISTS (\n\
                     SELECT 1 FROM {table} WHERE data_source_id = $3::varchar AND title = $2::varchar\n\
                 )"
            )],
        }
    }

    /// Run the step on `conn`, returning the number of affected rows.
    async fn apply(&self, conn: &mut PgConnection) -> Result<u64, DbError> {
        let mut affected = 0;
        match self {
            SchemaStep::Seed { rows, .. } => {
                let sql = self.statements().concat();
                for row in rows {
                    let query = sqlx::query(&sql)
                        .bind(row.chart_type.as_str())
                        .bind(row.title)
                        .bind(row.data_source_id)
                        .bind(&row.options)
                        .bind(Json(row.position));
                    affected += execute_logged(&mut *conn, query).await?;
                }
            }
            _ => {
                for sql in self.statements() {
                    affected += execute_logged(&mut *conn, sqlx::query(&sql)).await?;
                }
            }
        }
        Ok(affected)
    }
}

// ─── Descriptor ─────────────────────────────────────────────────────────────

/// A managed table and the steps that bring it to its required state.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub table: &'static str,
    pub steps: Vec<SchemaStep>,
}

impl SchemaDescriptor {
    /// The dashboard's chart configuration table.
    pub fn chart_configs() -> Self {
        const TABLE: &str = "chart_configs";

        let allowed = ChartType::ALL
            .iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(", ");

        let columns = format!(
            "
    id SERIAL PRIMARY KEY,
    type VARCHAR(50) NOT NULL CHECK (type IN ({allowed})),
    title VARCHAR(255) NOT NULL,
    data_source_id VARCHAR(100) NOT NULL,
    options JSONB NOT NULL DEFAULT '{{}}',
    position JSONB NOT NULL DEFAULT '{DEFAULT_POSITION_JSON}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP"
        );

        let index = |column: &'static str| SchemaStep::CreateIndex {
            name: format!("idx_{TABLE}_{column}"),
            table: TABLE,
            column,
        };

        Self {
            table: TABLE,
            steps: vec![
                SchemaStep::CreateTable {
                    table: TABLE,
                    columns,
                },
                SchemaStep::CreateFunction {
                    name: UPDATED_AT_FUNCTION,
                    body: "BEGIN\n    NEW.updated_at = CURRENT_TIMESTAMP;\n    RETURN NEW;\nEND;",
                },
                SchemaStep::CreateTrigger {
                    name: format!("update_{TABLE}_updated_at"),
                    table: TABLE,
                    function: UPDATED_AT_FUNCTION,
                },
                index("data_source_id"),
                index("type"),
                index("created_at"),
                SchemaStep::Seed {
                    table: TABLE,
                    rows: default_chart_configs(),
                },
            ],
        }
    }
}

fn default_chart_configs() -> Vec<SeedRow> {
    vec![
        SeedRow {
            chart_type: ChartType::Line,
            title: "Daily Food Consumption",
            data_source_id: "food_consumption_daily",
            options: json!({
                "chart": {"type": "line"},
                "xaxis": {"type": "datetime"},
                "yaxis": {"title": {"text": "Consumption (g)"}}
            }),
            position: Position::at(0, 0),
        },
        SeedRow {
            chart_type: ChartType::Bar,
            title: "Water vs Food Consumption",
            data_source_id: "consumption_comparison",
            options: json!({
                "chart": {"type": "bar"},
                "xaxis": {"categories": ["Food", "Water"]},
                "yaxis": {"title": {"text": "Average Daily Consumption"}}
            }),
            position: Position::at(6, 0),
        },
        SeedRow {
            chart_type: ChartType::Pie,
            title: "Product Distribution",
            data_source_id: "product_distribution",
            options: json!({
                "chart": {"type": "pie"},
                "labels": ["Product A", "Product B", "Product C"]
            }),
            position: Position::at(0, 4),
        },
        SeedRow {
            chart_type: ChartType::Line,
            title: "Water Consumption Trend",
            data_source_id: "water_consumption_daily",
            options: json!({
                "chart": {"type": "line"},
                "xaxis": {"type": "datetime"},
                "yaxis": {"title": {"text": "Consumption (ml)"}}
            }),
            position: Position::at(6, 4),
        },
    ]
}

// ─── Bootstrap ──────────────────────────────────────────────────────────────

/// Outcome of a successful [`ensure_schema`] run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub table: &'static str,
    pub steps_applied: usize,
    /// Rows seeded by this run (0 on a re-run).
    pub rows_seeded: u64,
    /// Rows in the table once the run finished.
    pub row_count: i64,
}

/// Bring the database to the state `descriptor` describes.
///
/// Step 1 checks connectivity, the descriptor's steps follow in order, and a
/// final step verifies the table and counts its rows. The first failure stops
/// the run and is reported as [`DbError::SchemaInit`]; already-applied steps
/// are left in place.
pub async fn ensure_schema(
    db: &Database,
    descriptor: &SchemaDescriptor,
) -> Result<SchemaReport, DbError> {
    tracing::info!(table = descriptor.table, "Starting database initialization");

    let connectivity = |e| DbError::schema_step(1, "verify connectivity", e);
    db.ping().await.map_err(connectivity)?;
    let mut client = db.acquire_client().await.map_err(connectivity)?;

    let mut rows_seeded = 0;
    for (i, step) in descriptor.steps.iter().enumerate() {
        let index = i + 2;
        let label = step.label();
        tracing::info!(step = index, name = %label, "Applying schema step");

        let affected = apply_locked(&mut client, step).await.map_err(|e| {
            tracing::error!(step = index, name = %label, error = %e, "Schema step failed");
            DbError::schema_step(index, label.clone(), e)
        })?;
        if matches!(step, SchemaStep::Seed { .. }) {
            rows_seeded += affected;
        }
    }

    let verify_index = descriptor.steps.len() + 2;
    let row_count = verify_table(&mut client, descriptor.table)
        .await
        .map_err(|e| DbError::schema_step(verify_index, "verify table", e))?;
    client.release();

    tracing::info!(
        table = descriptor.table,
        rows_seeded,
        row_count,
        "Database initialization completed successfully"
    );

    Ok(SchemaReport {
        table: descriptor.table,
        steps_applied: descriptor.steps.len(),
        rows_seeded,
        row_count,
    })
}

/// Drop the managed table and everything that depends on it.
///
/// Development use only: not safe against concurrent readers.
pub async fn drop_schema(db: &Database, descriptor: &SchemaDescriptor) -> Result<(), DbError> {
    tracing::warn!(table = descriptor.table, "Dropping table");
    let sql = format!("DROP TABLE IF EXISTS {} CASCADE", descriptor.table);
    db.execute(sqlx::query(&sql)).await?;
    tracing::info!(table = descriptor.table, "Table dropped");
    Ok(())
}

async fn apply_locked(client: &mut DbClient, step: &SchemaStep) -> Result<u64, DbError> {
    let mut tx = client.begin().await?;
    execute_logged(
        &mut tx,
        sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(SCHEMA_LOCK_KEY),
    )
    .await?;
    let affected = step.apply(&mut tx).await?;
    tx.commit().await.map_err(DbError::Query)?;
    Ok(affected)
}

async fn verify_table(client: &mut DbClient, table: &'static str) -> Result<i64, DbError> {
    let rows = client
        .query(
            sqlx::query(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = current_schema() AND table_name = $1
                )",
            )
            .bind(table),
        )
        .await?;
    let exists: bool = match rows.first() {
        Some(row) => row.try_get(0).map_err(DbError::Query)?,
        None => false,
    };
    if !exists {
        return Err(DbError::MissingTable(table.to_string()));
    }

    let sql = format!("SELECT COUNT(*) FROM {table}");
    let rows = client.query(sqlx::query(&sql)).await?;
    match rows.first() {
        Some(row) => row.try_get(0).map_err(DbError::Query),
        None => Ok(0),
    }
}
