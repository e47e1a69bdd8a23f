//! quittance-daemon - receipt ledger and task/lease engine.
//!
//! Boots the store, spawns the expiry reaper, and serves the HTTP surface
//! until SIGINT or SIGTERM, then drains gracefully.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use quittance_daemon::config::DaemonConfig;
use quittance_daemon::state::AppState;
use quittance_daemon::store::Store;
use quittance_daemon::{http, reaper};

/// quittance daemon - receipt-driven coordination substrate
#[derive(Parser, Debug)]
#[command(name = "quittance-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Override the bind address
    #[arg(long)]
    bind_addr: Option<std::net::SocketAddr>,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = DaemonConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if config.auth.tokens.is_empty() {
        tracing::warn!(
            "no auth tokens configured; every request will be rejected as unauthenticated"
        );
    }

    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening store at {}", config.db_path.display()))?;
    tracing::info!(db_path = %config.db_path.display(), "store opened");

    let state = Arc::new(AppState::new(store, &config));

    let (stop_reaper, reaper_shutdown) = watch::channel(false);
    let reaper_handle = reaper::spawn(
        state.tasks.clone(),
        config.engine.clone(),
        reaper_shutdown,
    );

    let app = http::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "quittance daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    stop_reaper.send(true).ok();
    reaper_handle.await.ok();
    tracing::info!("quittance daemon shut down");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => tracing::info!("SIGINT received"),
        _ = sigterm.recv() => tracing::info!("SIGTERM received"),
    }
}
