// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login routes (broker redirect and callback).

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{CallbackError, Result};
use crate::services::login::LoginCallback;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login))
        .route("/login/callback", get(login_callback))
}

/// Query parameters for starting a login.
#[derive(Deserialize)]
pub struct LoginParams {
    /// Only `offline_access` is accepted.
    #[serde(default)]
    scope: Option<String>,
    /// Client URL to return to. Falls back to `Referer`, then the
    /// configured default.
    #[serde(default)]
    redirect: Option<String>,
}

/// Start a login - redirect to the broker.
async fn login(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LoginParams>,
    headers: HeaderMap,
) -> Result<Redirect> {
    let referer = headers
        .get(header::REFERER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty());
    let redirect = params.redirect.as_deref().or(referer);

    let scopes: Vec<String> = params.scope.into_iter().collect();
    let auth_url = state.login.initiate(&scopes, redirect)?;

    tracing::info!(
        offline = !scopes.is_empty(),
        "Starting login, redirecting to broker"
    );

    Ok(Redirect::temporary(&auth_url))
}

/// Broker redirect back after authentication.
#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Login callback - exchange code, reconcile identity, redirect with token.
async fn login_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> std::result::Result<Redirect, CallbackError> {
    let target = state
        .login
        .complete_callback(LoginCallback {
            code: params.code,
            state: params.state,
            error: params.error,
        })
        .await?;

    Ok(Redirect::temporary(target.as_str()))
}
