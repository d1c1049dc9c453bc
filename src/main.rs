// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Broker-Auth API Server
//!
//! Signs users in through the Keycloak broker and links additional
//! provider accounts to their identity.

use broker_auth::{config::Config, db::MemoryIdentityStore, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Broker-Auth API");

    let store = Arc::new(MemoryIdentityStore::new());
    tracing::info!("Identity store initialized");

    let state = Arc::new(AppState::new(config.clone(), store)?);
    tracing::info!(
        kid = %state.tokens.keys().active_kid(),
        verification_keys = state.tokens.public_keys().len(),
        "Signing keys loaded"
    );

    // Build router
    let app = broker_auth::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("broker_auth=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
