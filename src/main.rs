// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! chat-auth loopback listener
//!
//! Restores the persisted session, then serves the login callback, consent
//! and profile endpoints on 127.0.0.1 until the user declines the terms or
//! the process is interrupted.

use chat_auth::{
    backend::{FileSessionStorage, RestClient, RestIdentityProvider, RestRowStore},
    config::Config,
    routes, AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.callback_port,
        terms_version = %config.terms_version,
        "Starting chat-auth"
    );

    // Backend clients share one persisted session
    let client = RestClient::new(&config.backend_url, &config.backend_anon_key);
    let storage = FileSessionStorage::new(&config.session_file);
    let provider = Arc::new(RestIdentityProvider::new(
        client,
        storage,
        config.redirect_url.clone(),
    ));
    let store = Arc::new(RestRowStore::new(provider.clone()));
    tracing::info!(
        backend = %config.backend_url,
        session_file = %config.session_file.display(),
        "Backend initialized"
    );

    let state = Arc::new(AppState::new(config.clone(), provider, store));
    let gate = state.start().await;
    tracing::info!(
        authenticated = state.sessions.is_authenticated(),
        gate = ?gate,
        "Launch checks complete"
    );

    let app = routes::create_router_with(state.clone(), routes::login::routes());

    // Loopback only: this listener receives login credentials
    let addr = format!("127.0.0.1:{}", config.callback_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    let exit = state.exit.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = exit.wait() => tracing::info!("Exit requested, shutting down"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
            }
        })
        .await?;

    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_auth=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
