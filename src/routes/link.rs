// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account linking routes.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Extension, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::error::{AppError, CallbackError, Result};
use crate::middleware::auth::AuthUser;
use crate::services::link::LinkCallback;
use crate::AppState;

/// `/link/session` needs an authenticated identity; the other two legs are
/// authenticated by the linking session itself.
pub fn session_routes() -> Router<Arc<AppState>> {
    Router::new().route("/link/session", get(link_session))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/link", get(link))
        .route("/link/callback", get(link_callback))
}

/// Query parameters for starting a link.
#[derive(Deserialize, Validate)]
pub struct SessionParams {
    /// Identity-provider alias to link (e.g. "github")
    #[validate(length(min = 1, max = 64))]
    provider: String,
    /// OAuth client the redirect belongs to; defaults to our own client.
    #[serde(default)]
    #[validate(length(min = 1, max = 255))]
    client_id: Option<String>,
    #[validate(length(min = 1, max = 2048))]
    redirect: String,
}

/// Leg 1: mint a linking session for the current identity.
async fn link_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<SessionParams>,
) -> Result<Redirect> {
    params
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let client_id = params
        .client_id
        .as_deref()
        .unwrap_or(&state.config.broker.client_id);

    let url = state
        .link
        .session_init(user.identity_id, &params.provider, client_id, &params.redirect)?;

    Ok(Redirect::temporary(&url))
}

#[derive(Deserialize)]
pub struct LinkParams {
    session: String,
}

/// Leg 2: verify the session and send the user to the provider.
async fn link(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LinkParams>,
) -> Result<Redirect> {
    let url = state.link.link(&params.session)?;
    Ok(Redirect::temporary(&url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Leg 3: attach the provider account and return to the client.
async fn link_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> std::result::Result<Redirect, CallbackError> {
    let target = state
        .link
        .link_callback(LinkCallback {
            code: params.code,
            state: params.state,
            error: params.error,
        })
        .await?;

    Ok(Redirect::temporary(target.as_str()))
}
