// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token endpoints: public keys and refresh.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::services::keys::PublicKeyInfo;
use crate::services::tokens::{IssuedTokens, RefreshClaims};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/token/keys", get(keys))
        .route("/token/refresh", post(refresh))
}

#[derive(Serialize)]
pub struct KeysResponse {
    pub keys: Vec<PublicKeyInfo>,
}

/// Verification keys, including ones kept for a rotation grace period.
async fn keys(State(state): State<Arc<AppState>>) -> Json<KeysResponse> {
    Json(KeysResponse {
        keys: state.tokens.public_keys(),
    })
}

#[derive(Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Exchange a refresh token for a new token set.
async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<IssuedTokens>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let claims: RefreshClaims = state.tokens.verify(&body.refresh_token)?;

    let identity = state
        .store
        .identity(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !identity.is_active() {
        return Err(AppError::AccountDeprovisioned);
    }

    let issued = state.tokens.issue_tokens(&identity, &claims.scopes())?;
    tracing::info!(identity_id = %identity.id, "Tokens refreshed");

    Ok(Json(issued))
}
