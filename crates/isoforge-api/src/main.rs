//! isoforge API server

use anyhow::Context;
use clap::Parser;
use isoforge_api::{AppState, build_executor, routes};
use isoforge_config::{LogFormat, ServerConfig};
use isoforge_scheduler::{QueueManager, QueueSettings};
use isoforge_store::{JobStore, JsonFileStore, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "isoforge-server")]
#[command(about = "Queue and run archiso builds over HTTP", long_about = None)]
#[command(version)]
struct Args {
    /// KDL configuration file
    #[arg(short, long, env = "ISOFORGE_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Keep the queue in memory instead of the data directory
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref())
        .context("failed to load configuration")?
        .with_process_env()
        .context("invalid environment override")?;

    init_tracing(config.log_format);

    let store: Arc<dyn JobStore> = if args.ephemeral {
        info!("Using in-memory job store");
        Arc::new(MemoryStore::new())
    } else {
        info!(data_dir = %config.data_dir.display(), "Using file job store");
        Arc::new(JsonFileStore::new(&config.data_dir))
    };

    let executor = build_executor(&config.executor);
    info!(executor = executor.name(), "Build executor ready");

    let settings = QueueSettings {
        idle_poll: config.idle_poll,
        ..QueueSettings::default()
    };
    let manager = QueueManager::open(store, executor, settings).await;

    let state = AppState::new(manager, &config);

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.bind);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
