//! Vibe Dash database tool: one-shot operator commands against the pool.
//!
//! - `init`: create tables, trigger, indexes and seed rows (safe to re-run)
//! - `drop`: drop the managed tables (development only)
//! - `test`: connection test with server version, pool stats and tables
//! - `check-env`: verify deployment-required environment variables

use clap::{Parser, Subcommand};
use eyre::{Result, bail};
use vibedash_core::{Settings, telemetry};
use vibedash_storage::{self as storage, Database, SchemaDescriptor, repos};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vibe Dash database tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Create the schema and default rows if they are missing.
    Init {
        /// Print the rows present after initialization.
        #[arg(long)]
        show: bool,
    },
    /// Drop the managed tables and everything depending on them.
    Drop {
        /// Confirm the drop; nothing happens without it.
        #[arg(long)]
        yes: bool,
    },
    /// Test the database connection.
    Test,
    /// Check that deployment-required environment variables are set.
    CheckEnv,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Command::CheckEnv => check_env(),
        Command::Init { show } => init(&Settings::from_env()?, show).await,
        Command::Drop { yes } => drop_tables(&Settings::from_env()?, yes).await,
        Command::Test => test_connection(&Settings::from_env()?).await,
    }
}

fn check_env() -> Result<()> {
    dotenvy::dotenv().ok();
    Settings::check_required(|key| std::env::var(key).ok())?;
    println!("All required environment variables are set.");
    Ok(())
}

async fn init(settings: &Settings, show: bool) -> Result<()> {
    let db = storage::connect(&settings.db).await?;
    init_with(&db, show).await
}

/// Apply the schema, then close the pool whatever the outcome.
async fn init_with(db: &Database, show: bool) -> Result<()> {
    let outcome = apply_schema(db, show).await;
    db.close_pool().await;
    outcome
}

async fn apply_schema(db: &Database, show: bool) -> Result<()> {
    let report = storage::ensure_schema(db, &SchemaDescriptor::chart_configs()).await?;
    println!(
        "{}: {} steps applied, {} rows seeded, {} rows total",
        report.table, report.steps_applied, report.rows_seeded, report.row_count
    );

    if show {
        for config in repos::list_chart_configs(db).await? {
            println!(
                "  #{:<3} {:<8} {:<30} {}",
                config.id, config.chart_type, config.title, config.data_source_id
            );
        }
    }
    Ok(())
}

async fn drop_tables(settings: &Settings, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to drop tables without --yes");
    }

    let descriptor = SchemaDescriptor::chart_configs();
    tracing::warn!(table = descriptor.table, "Dropping managed tables");
    let db = storage::connect(&settings.db).await?;
    let outcome = storage::drop_schema(&db, &descriptor).await;
    db.close_pool().await;
    outcome?;

    println!("Tables dropped successfully");
    Ok(())
}

async fn test_connection(settings: &Settings) -> Result<()> {
    let db = &settings.db;
    println!("Testing database connection...");
    match &db.url {
        Some(_) => println!("- Target: DATABASE_URL"),
        None => {
            println!("- Host: {}", db.host);
            println!("- Port: {}", db.port);
            println!("- User: {}", db.user);
            println!("- Database: {}", db.database);
        }
    }
    println!();

    let db = Database::connect_lazy(db)?;
    let outcome = report_connection(&db).await;
    db.close_pool().await;
    outcome
}

async fn report_connection(db: &Database) -> Result<()> {
    if !db.test_connection().await {
        bail!("database connection failed");
    }
    println!("Database connection successful!");
    println!("PostgreSQL version: {}", repos::server_version(db).await?);

    let stats = db.pool_stats();
    println!(
        "Pool stats: total={} idle={} waiting={}",
        stats.total, stats.idle, stats.waiting
    );

    println!("Existing tables:");
    for table in repos::list_tables(db).await? {
        println!("  - {table}");
    }
    Ok(())
}
