mod config;
mod credentials;
mod error;
mod forge;
mod git;
mod health;
mod http;
mod metrics;
mod naming;
mod validation;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "whitelist-api",
    version,
    about = "Tenant whitelist API backed by a Bitbucket git repository"
)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long, env = "WHITELIST_CONFIG")]
    config: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared across all request handlers.
pub struct AppState {
    pub config: Arc<Config>,
    /// Version-control host the handlers read from and write to.
    pub backend: Arc<dyn forge::ForgeBackend>,
    pub metrics: MetricsRegistry,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: Arc<AppState>) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .listen
        .parse()
        .context("invalid server.listen address")?;

    let app = http::handler::create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // ---- Config ----
    let config = Arc::new(config::load_config(cli.config.as_deref())?);

    tracing::info!(
        config_path = cli.config.as_deref().unwrap_or("<defaults>"),
        environment = %config.service.environment,
        upstream = %config.upstream.hostname,
        "starting whitelist-api"
    );

    if !config.upstream.tls_verify {
        tracing::warn!(
            upstream = %config.upstream.hostname,
            "upstream TLS certificate verification is disabled"
        );
    }

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Forge backend ----
    let backend: Arc<dyn forge::ForgeBackend> =
        Arc::from(forge::build_backend(&config, metrics.clone())?);

    // ---- App state ----
    let state = Arc::new(AppState {
        config,
        backend,
        metrics,
    });

    run_http_server(state).await?;

    tracing::info!("whitelist-api shut down");
    Ok(())
}
