//! video-stream server binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use video_stream::routes::{self, AppState};
use video_stream::Config;

/// Range-capable video file server
#[derive(Parser, Debug)]
#[command(name = "video-stream")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "VIDEO_STREAM_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Overrides the configured listen address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Overrides the configured storage root
    #[arg(long)]
    storage_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("video-stream v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(Some(args.config.as_path())).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(storage_root) = args.storage_root {
        config.storage_root = storage_root;
    }

    let state = AppState::from_config(&config)
        .await
        .with_context(|| format!("failed to open storage root {}", config.storage_root.display()))?;
    tracing::info!(
        videos = %state.videos.path().display(),
        files = state.files.is_some(),
        "storage ready"
    );

    let app = routes::router(state, &config.api_prefix);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("listening @ {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
