//! Aegis Server - passkey authentication for the storefront
//!
//! Exposes the authentication core via HTTP endpoints:
//! - POST /auth/enroll/start|finish - authenticator enrollment
//! - POST /auth/authenticate/start|finish - authentication
//! - POST /auth/introspect - RFC 7662-style token introspection

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use aegis_server::{create_router, AppState, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let addr = config.socket_addr();

    let state = match AppState::from_env(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    // Housekeeping: periodically delete expired, unconsumed challenges.
    // Expiry is enforced at consume time regardless; this just reclaims rows.
    let challenges = state.challenges.clone();
    let sweep_interval = Duration::from_secs(state.config.challenge_ttl_secs.max(30));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match challenges.sweep_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(removed = n, "Swept expired challenges"),
                Err(e) => tracing::warn!(error = %e, "Challenge sweep failed"),
            }
        }
    });

    let app = create_router(state);

    tracing::info!(%addr, "Aegis server listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
