// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access-token authentication middleware.

use crate::error::AppError;
use crate::services::tokens::AccessClaims;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use uuid::Uuid;

/// Cookie a browser client may keep the access token in.
pub const AUTH_COOKIE: &str = "auth_token";

/// Authenticated identity extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity_id: Uuid,
    pub claims: AccessClaims,
}

/// Middleware that requires a valid access token for an active identity.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Header first, then cookie
    let token = match bearer_token(&request) {
        Some(token) => token,
        None => jar
            .get(AUTH_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(AppError::Unauthorized)?,
    };

    let claims: AccessClaims = state.tokens.verify(&token)?;

    // Revocation: the identity must still exist and be active.
    match state.store.identity(claims.sub).await? {
        Some(identity) if identity.is_active() => {}
        Some(_) => {
            tracing::warn!(identity_id = %claims.sub, "Token presented for deprovisioned identity");
            return Err(AppError::Unauthorized);
        }
        None => {
            tracing::warn!(identity_id = %claims.sub, "Token presented for unknown identity");
            return Err(AppError::Unauthorized);
        }
    }

    request.extensions_mut().insert(AuthUser {
        identity_id: claims.sub,
        claims,
    });

    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
