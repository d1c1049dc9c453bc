// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Broker-Auth: sign-in and account linking through a Keycloak broker
//!
//! This crate drives the OAuth2 login and account-link redirect flows,
//! reconciles broker profiles with internal identities and issues
//! first-party RS256 tokens.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use anyhow::Context;
use config::Config;
use db::IdentityStore;
use services::{
    KeyStore, LinkOrchestrator, LoginOrchestrator, OAuthBroker, RedirectPolicy, TokenLifetimes,
    TokenManager,
};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub tokens: Arc<TokenManager>,
    pub store: Arc<dyn IdentityStore>,
    pub redirects: Arc<RedirectPolicy>,
    pub login: LoginOrchestrator,
    pub link: LinkOrchestrator,
}

impl AppState {
    /// Wire up keys, broker client and orchestrators from `config`.
    pub fn new(config: Config, store: Arc<dyn IdentityStore>) -> anyhow::Result<Self> {
        let keys = KeyStore::from_config(&config.signing).context("Failed to load signing keys")?;
        let tokens = Arc::new(TokenManager::new(
            keys,
            config.broker.public_url.clone(),
            TokenLifetimes {
                access: config.access_token_ttl,
                refresh: config.refresh_token_ttl,
                link_session: config.link_session_ttl,
            },
        ));

        let redirects = Arc::new(
            RedirectPolicy::from_config(&config).context("Invalid VALID_REDIRECT_PATTERNS")?,
        );
        let broker = OAuthBroker::keycloak(Arc::new(config.broker.clone()))?;

        let login = LoginOrchestrator::new(
            &config,
            broker.clone(),
            store.clone(),
            tokens.clone(),
            redirects.clone(),
        )?;
        let link = LinkOrchestrator::new(broker, store.clone(), tokens.clone(), redirects.clone());

        Ok(Self {
            config,
            tokens,
            store,
            redirects,
            login,
            link,
        })
    }
}
