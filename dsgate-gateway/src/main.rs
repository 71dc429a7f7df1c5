//! # DSGate Gateway Binary
//!
//! Entry point for the DSGate data-source gateway server.
//!
//! ## Usage
//!
//! ```bash
//! # Default configuration file (config.toml)
//! dsgate-gateway
//!
//! # Custom configuration file
//! dsgate-gateway --config /etc/dsgate/config.toml
//!
//! # Host/port/log-level overrides
//! dsgate-gateway --host 0.0.0.0 --port 8080 --log-level debug
//! ```
//!
//! ## Shutdown
//!
//! On SIGINT or SIGTERM the server stops accepting connections, drains
//! in-flight requests within the configured grace period, stops every
//! running plugin instance in parallel, and closes the system database.

use clap::Parser;
use dsgate_gateway::{config::Config, server::create_server};
use std::net::SocketAddr;

/// Command line arguments for the DSGate gateway server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Host address override.
    #[arg(long)]
    host: Option<String>,

    /// Port override.
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Missing config file falls back to defaults so a bare binary starts
    // with a local SQLite file and no repositories.
    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::load(&args.config)?
    } else {
        tracing::warn!(path = %args.config, "Config file not found, using defaults");
        Config::default()
    };

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let shutdown_grace = config.server.shutdown_grace;

    let (app, state) = create_server(config).await?;

    tracing::info!("Starting DSGate gateway on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // The watch channel lets the drain-deadline arm know when the signal
    // actually fired.
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tokio::select! {
        result = serve => result?,
        _ = async {
            let _ = shutdown_rx.wait_for(|fired| *fired).await;
            tokio::time::sleep(shutdown_grace).await;
        } => {
            tracing::warn!("Drain deadline exceeded, closing remaining connections");
        }
    }

    tracing::info!("Stopping running instances");
    state.supervisor.stop_all().await;
    state.store.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
