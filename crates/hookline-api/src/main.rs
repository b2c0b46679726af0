//! hookline API server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hookline_api::services::{AesGcmCipher, HttpStageExecutor};
use hookline_api::state::Repos;
use hookline_api::{AppState, routes};
use hookline_config::{LogFormat, SystemConfig};
use hookline_db::{create_pool, run_migrations};
use hookline_queue::{PgJobStore, QueueManager, register_maintenance};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hookline-server")]
#[command(about = "hookline webhook and job queue server", long_about = None)]
struct Args {
    /// Path to hookline.kdl
    #[arg(long, env = "HOOKLINE_CONFIG", default_value = "hookline.kdl")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = SystemConfig::load(Some(args.config.as_path()))
        .with_context(|| format!("loading {}", args.config.display()))?;

    init_tracing(config.log.format);

    let master_key = config
        .security
        .encryption_key
        .clone()
        .context("security.encryption-key (or HOOKLINE_ENCRYPTION_KEY) must be set")?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let queue = QueueManager::new(
        Arc::new(PgJobStore::new(pool.clone())),
        config.queues.clone(),
        config.workers.clone(),
    );
    let state = AppState::new(
        Some(pool.clone()),
        Repos::postgres(pool),
        queue.clone(),
        Arc::new(AesGcmCipher::from_master_key(&master_key)),
    );

    let executor = HttpStageExecutor::new(
        config.executor.endpoint.clone(),
        Duration::from_secs(config.executor.timeout_secs),
    )?;
    state.register_processors(Arc::new(executor)).await?;
    register_maintenance(&queue, &config.maintenance).await?;

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining queues");
    queue.drain_and_close().await;
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
