//! Vibe Dash API Server: service info and health backed by the PostgreSQL pool.

use std::{any::Any, net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use vibedash_core::{Settings, telemetry};
use vibedash_storage::{self as storage, Database, PoolStats, SchemaDescriptor};

const SERVICE_NAME: &str = "vibe-dash-backend";

/// Shared application state.
struct AppState {
    db: Database,
    started: Instant,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(env = %settings.environment, "Starting Vibe Dash API Server");

    // The pool is lazy so an unreachable database degrades /health instead
    // of preventing startup.
    let db = Database::connect_lazy(&settings.db)?;
    if db.test_connection().await {
        tracing::info!(target_db = %settings.db.target(), "Database connection established");
    } else {
        tracing::warn!(target_db = %settings.db.target(), "Database connection failed");
    }

    if settings.auto_init_schema {
        match storage::ensure_schema(&db, &SchemaDescriptor::chart_configs()).await {
            Ok(report) => tracing::info!(
                table = report.table,
                rows = report.row_count,
                "Database schema ready"
            ),
            Err(e) => tracing::error!(error = %e, "Database initialization failed"),
        }
    }

    let state = Arc::new(AppState {
        db: db.clone(),
        started: Instant::now(),
    });

    let production = settings.is_production();
    let app = router(state)
        .layer(cors(&settings.frontend_url)?)
        .layer(CatchPanicLayer::custom(
            move |err: Box<dyn Any + Send + 'static>| panic_response(err, production),
        ))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health check available at http://localhost:{}/health", settings.api_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close_pool().await;
    tracing::info!("API server stopped.");
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
}

fn cors(frontend_url: &str) -> eyre::Result<CorsLayer> {
    Ok(CorsLayer::new()
        .allow_origin(HeaderValue::from_str(frontend_url)?)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully…");
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    status: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    uptime_secs: u64,
    service: &'static str,
    database: DatabaseHealth,
}

#[derive(Serialize)]
struct DatabaseHealth {
    connected: bool,
    pool: PoolStats,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    timestamp: String,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// GET /: service banner.
async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Vibe Dash Backend API",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

/// GET /health: 200 when the database answers, 503 otherwise.
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let connected = state.db.test_connection().await;
    let (code, status) = if connected {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DEGRADED")
    };

    (
        code,
        Json(HealthResponse {
            status,
            timestamp: now(),
            uptime_secs: state.started.elapsed().as_secs(),
            service: SERVICE_NAME,
            database: DatabaseHealth {
                connected,
                pool: state.db.pool_stats(),
            },
        }),
    )
}

async fn not_found(uri: Uri) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not Found",
            message: format!("Route {uri} not found"),
            timestamp: now(),
        }),
    )
}

fn panic_response(err: Box<dyn Any + Send + 'static>, production: bool) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    };
    tracing::error!(error = %detail, "Handler panicked");

    let message = if production {
        "Something went wrong".to_string()
    } else {
        detail
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal Server Error",
            message,
            timestamp: now(),
        }),
    )
        .into_response()
}
