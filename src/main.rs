//! ObjectStore -- S3-compatible object storage server.
//!
//! Every write is a committed transaction in the embedded store, so there
//! is no recovery step at startup and nothing to flush at shutdown.
//! SIGTERM/SIGINT stop accepting connections and let in-flight requests
//! finish.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use objectstore::auth::{ConfigUserDirectory, CredentialResolver};
use objectstore::config::{Config, LoggingConfig};
use objectstore::events::sink_from_config;
use objectstore::storage::{KvStore, ObjectStore};

/// Command-line arguments for the ObjectStore server.
#[derive(Parser, Debug)]
#[command(
    name = "objectstore",
    version,
    about = "S3-compatible object storage server"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "objectstore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = objectstore::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        objectstore::metrics::init_metrics().context("installing Prometheus recorder")?;
        info!("Prometheus metrics initialized");
    }

    let state = Arc::new(build_state(config)?);
    let app = objectstore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("ObjectStore listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("ObjectStore shut down");
    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_state(config: Config) -> anyhow::Result<objectstore::AppState> {
    let kv = KvStore::open(&config.storage.path)
        .with_context(|| format!("opening database {}", config.storage.path))?;
    info!("Key-value store opened at {}", config.storage.path);

    let users = Arc::new(ConfigUserDirectory::from_config(&config.auth));
    info!("{} user(s) configured", users.len());
    let resolver = CredentialResolver::new(&config.auth, users);

    let store = ObjectStore::new(
        kv,
        &config.server.region,
        &config.storage,
        sink_from_config(&config.events),
    );

    Ok(objectstore::AppState {
        config,
        store,
        resolver,
    })
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
