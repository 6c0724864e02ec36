//! Assetwatch API server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use assetwatch_api::config::RepositoryConfig;
use assetwatch_api::error::AppError;
use assetwatch_api::state::AppState;
use assetwatch_core::clock::SystemClock;
use assetwatch_event_store::pg_event_log::PgEventLog;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting assetwatch API server");

    // Read configuration from environment.
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| AppError::Config("DATABASE_URL environment variable must be set".into()))?;
    let repository_path = std::env::var("ASSETWATCH_REPOSITORY").map(PathBuf::from).map_err(|_| {
        AppError::Config("ASSETWATCH_REPOSITORY environment variable must be set".into())
    })?;
    let host = env_or("HOST", "0.0.0.0");
    let port: u16 = env_or("PORT", "3000")
        .parse()
        .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?;
    let max_connections: u32 = env_or("DATABASE_MAX_CONNECTIONS", "10")
        .parse()
        .map_err(|e| AppError::Config(format!("DATABASE_MAX_CONNECTIONS must be a valid u32: {e}")))?;

    let repository = RepositoryConfig::load(&repository_path)?.into_repository()?;

    // Create database connection pool.
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await?;
    let event_log = PgEventLog::new(pool);
    event_log
        .ensure_schema()
        .await
        .map_err(|e| AppError::Config(format!("cannot prepare event log schema: {e}")))?;

    let app_state = AppState::new(Arc::new(SystemClock), Arc::new(event_log), repository);

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = assetwatch_api::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server.
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
