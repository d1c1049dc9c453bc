// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Current user route.

use axum::{extract::State, routing::get, Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Identity, User};
use crate::AppState;

/// Routes behind `require_auth` (applied in routes/mod.rs).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/user", get(get_user))
}

#[derive(Serialize)]
pub struct UserResponse {
    pub identity: Identity,
    pub user: Option<User>,
    /// Scopes of the presented access token
    pub scopes: Vec<String>,
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let identity = state
        .store
        .identity(auth.identity_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let user = state.store.user(identity.id).await?;

    Ok(Json(UserResponse {
        identity,
        user,
        scopes: auth.claims.scopes(),
    }))
}
