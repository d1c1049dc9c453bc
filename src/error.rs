// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use url::Url;

use crate::db::StoreError;
use crate::services::state::StateError;
use crate::services::tokens::{SigningError, VerificationError};

/// Terminal failure kind of a login or link flow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BrokerUnreachable,
    ExchangeFailed,
    ProfileFetchFailed,
    IdentityReconcileFailed,
    RedirectTargetInvalid,
    TokenVerificationFailed,
    StateInvalid,
    AccountDeprovisioned,
    BadRequest,
    Unauthorized,
    Internal,
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Redirect target not allowed: {0}")]
    InvalidRedirectTarget(String),

    #[error("Unsupported scope: {0}")]
    InvalidScope(String),

    #[error("Unknown identity provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid state parameter: {0}")]
    InvalidState(#[from] StateError),

    #[error("Token verification failed: {0}")]
    TokenVerification(#[from] VerificationError),

    #[error("Identity broker unreachable: {0}")]
    BrokerUnreachable(String),

    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(String),

    #[error("Account {provider}/{subject} is already linked to another identity")]
    IdentityConflict { provider: String, subject: String },

    #[error("Identity reconciliation failed: {0}")]
    IdentityReconcileFailed(String),

    #[error("Account is deprovisioned")]
    AccountDeprovisioned,

    #[error("Token signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Flow failure kind this error terminates a flow with.
    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::Unauthorized => FailureKind::Unauthorized,
            AppError::BadRequest(_) | AppError::InvalidScope(_) | AppError::UnknownProvider(_) => {
                FailureKind::BadRequest
            }
            AppError::InvalidRedirectTarget(_) => FailureKind::RedirectTargetInvalid,
            AppError::InvalidState(_) => FailureKind::StateInvalid,
            AppError::TokenVerification(_) => FailureKind::TokenVerificationFailed,
            AppError::BrokerUnreachable(_) => FailureKind::BrokerUnreachable,
            AppError::ExchangeFailed(_) => FailureKind::ExchangeFailed,
            AppError::ProfileFetchFailed(_) => FailureKind::ProfileFetchFailed,
            AppError::IdentityConflict { .. } | AppError::IdentityReconcileFailed(_) => {
                FailureKind::IdentityReconcileFailed
            }
            AppError::AccountDeprovisioned => FailureKind::AccountDeprovisioned,
            AppError::Signing(_) | AppError::Internal(_) => FailureKind::Internal,
        }
    }

    /// Stable error code shown to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::BadRequest(_) => "bad_request",
            AppError::InvalidRedirectTarget(_) => "invalid_redirect_target",
            AppError::InvalidScope(_) => "invalid_scope",
            AppError::UnknownProvider(_) => "unknown_provider",
            AppError::InvalidState(_) => "invalid_state",
            AppError::TokenVerification(VerificationError::Expired) => "token_expired",
            AppError::TokenVerification(_) => "invalid_token",
            AppError::BrokerUnreachable(_) => "broker_unreachable",
            AppError::ExchangeFailed(_) => "exchange_failed",
            AppError::ProfileFetchFailed(_) => "profile_fetch_failed",
            AppError::IdentityConflict { .. } => "identity_conflict",
            AppError::IdentityReconcileFailed(_) => "identity_reconcile_failed",
            AppError::AccountDeprovisioned => "account_deprovisioned",
            AppError::Signing(_) => "internal_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized | AppError::TokenVerification(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_)
            | AppError::InvalidRedirectTarget(_)
            | AppError::InvalidScope(_)
            | AppError::UnknownProvider(_)
            | AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::AccountDeprovisioned => StatusCode::FORBIDDEN,
            AppError::IdentityConflict { .. } => StatusCode::CONFLICT,
            AppError::BrokerUnreachable(_)
            | AppError::ExchangeFailed(_)
            | AppError::ProfileFetchFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::IdentityReconcileFailed(_) | AppError::Signing(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { provider, subject } => {
                AppError::IdentityConflict { provider, subject }
            }
            other => AppError::IdentityReconcileFailed(other.to_string()),
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal detail stays in the logs only.
        let details = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, kind = ?self.kind(), "Request failed");
            None
        } else {
            tracing::warn!(error = %self, kind = ?self.kind(), "Request rejected");
            Some(self.to_string())
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Failure of a callback leg.
///
/// Once the callback's `state` has been verified the client target is trusted,
/// so the failure is reported by redirecting there with `?error=<code>`.
/// Without a trusted target the plain JSON error is returned.
#[derive(Debug)]
pub struct CallbackError {
    pub error: AppError,
    pub redirect: Option<Url>,
}

impl CallbackError {
    pub fn new(error: impl Into<AppError>, redirect: Option<Url>) -> Self {
        Self {
            error: error.into(),
            redirect,
        }
    }

    /// Error with no trusted redirect target.
    pub fn bare(error: impl Into<AppError>) -> Self {
        Self::new(error, None)
    }

    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

impl From<AppError> for CallbackError {
    fn from(error: AppError) -> Self {
        Self::bare(error)
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for CallbackError {}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        match self.redirect {
            Some(mut target) => {
                tracing::warn!(
                    error = %self.error,
                    kind = ?self.error.kind(),
                    "Flow failed, redirecting to client with error"
                );
                target
                    .query_pairs_mut()
                    .append_pair("error", self.error.code());
                Redirect::temporary(target.as_str()).into_response()
            }
            None => self.error.into_response(),
        }
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
