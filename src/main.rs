//! authgate entry point.
//!
//! Bootstraps the gateway:
//! 1. Load configuration from environment
//! 2. Build the credential table and token service
//! 3. Build router: login flow + login page assets + gated forwarding
//! 4. Start Axum server with graceful shutdown

use authgate::{
    auth::{AppState, CredentialStore, TokenService},
    config::Config,
    proxy::Forwarder,
    routes,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "authgate failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Load config from environment
    let config = Config::from_env()?;
    tracing::info!("Starting authgate on {}", config.bind_addr);

    let credentials = CredentialStore::new(&config.users)?;
    tracing::info!(users = credentials.len(), "Credential table loaded");

    let tokens = TokenService::new(&config);
    let forwarder = Forwarder::new(&config)?;
    tracing::info!("Proxying to {}", config.backend_url);

    let app = routes::gateway_router(&config.static_dir);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    let state = AppState {
        credentials: Arc::new(credentials),
        tokens: Arc::new(tokens),
        forwarder,
    };

    axum::serve(listener, app.with_state(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
