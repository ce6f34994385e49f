//! jarboot-auth - Authentication gate and identity service
//!
//! This is the main entry point for the jarboot-auth application.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use jarboot_auth::auth::{AuthGate, AuthManager, SharedSecretTrust, TokenManager};
use jarboot_auth::config::Config;
use jarboot_auth::database::SqliteDatabase;
use jarboot_auth::error::AppError;
use jarboot_auth::identity::{CredentialStore, PrivilegeRegistry};
use jarboot_auth::server::{AppState, Server};
use jarboot_auth::telemetry::init_tracing;

/// Interval between sweeps of stale rate limiter entries
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// jarboot-auth - Authentication gate and identity service
#[derive(Parser, Debug)]
#[command(name = "jarboot-auth")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "JARBOOT_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting jarboot-auth");

    run(config).await.map_err(Into::into)
}

async fn run(config: Config) -> Result<(), AppError> {
    // Initialize database
    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    // Identity layer
    let credentials = Arc::new(CredentialStore::new(Arc::clone(&database)));
    let privileges = Arc::new(PrivilegeRegistry::new(Arc::clone(&database)));
    credentials.bootstrap().await?;

    // Token and cluster trust
    let tokens = Arc::new(TokenManager::new(
        config.auth.token_secret.as_deref(),
        config.auth.token_lifetime(),
    ));
    let cluster = SharedSecretTrust::new(
        config.cluster.node_host.clone(),
        config.cluster.peers.clone(),
        config.cluster.secret.as_deref(),
        config.cluster.credential_ttl(),
    );
    info!(
        node_host = %config.cluster.node_host,
        peers = config.cluster.peers.len(),
        "Cluster trust initialized"
    );
    let gate = Arc::new(AuthGate::new(Arc::clone(&tokens), Arc::new(cluster)));

    // Login manager
    let auth_manager = Arc::new(AuthManager::new(
        Arc::clone(&credentials),
        tokens,
        (&config.auth.rate_limit).into(),
    ));

    let cleanup = {
        let auth_manager = Arc::clone(&auth_manager);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                auth_manager.cleanup_rate_limits();
            }
        })
    };

    // Create application state
    let state = AppState {
        credentials,
        privileges,
        auth_manager,
        gate,
    };

    // Create and start the HTTP server
    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;
    cleanup.abort();

    if let Err(e) = &result {
        error!(error = %e, "Server stopped with an error");
    }
    info!("jarboot-auth shutdown complete");

    result.map_err(|e| AppError::Internal(e.to_string()))
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let config = match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path)
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env()
        }
    }
    .map_err(|e| AppError::Config(e.to_string()))?;

    config
        .validate()
        .map_err(|e| AppError::Config(e.to_string()))?;
    Ok(config)
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
