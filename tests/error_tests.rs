// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use broker_auth::db::StoreError;
use broker_auth::error::{AppError, CallbackError, FailureKind};
use broker_auth::services::state::StateError;
use broker_auth::services::tokens::VerificationError;
use url::Url;

#[test]
fn test_flow_failure_kinds() {
    let cases = [
        (
            AppError::InvalidRedirectTarget("x".to_string()),
            FailureKind::RedirectTargetInvalid,
        ),
        (
            AppError::BrokerUnreachable("x".to_string()),
            FailureKind::BrokerUnreachable,
        ),
        (
            AppError::ExchangeFailed("x".to_string()),
            FailureKind::ExchangeFailed,
        ),
        (
            AppError::ProfileFetchFailed("x".to_string()),
            FailureKind::ProfileFetchFailed,
        ),
        (
            AppError::IdentityReconcileFailed("x".to_string()),
            FailureKind::IdentityReconcileFailed,
        ),
        (
            AppError::TokenVerification(VerificationError::BadSignature),
            FailureKind::TokenVerificationFailed,
        ),
        (
            AppError::InvalidState(StateError::Expired),
            FailureKind::StateInvalid,
        ),
    ];

    for (err, kind) in cases {
        assert_eq!(err.kind(), kind, "{err}");
    }
}

#[test]
fn test_store_conflict_is_identity_conflict() {
    let err: AppError = StoreError::Conflict {
        provider: "github".to_string(),
        subject: "42".to_string(),
    }
    .into();

    assert_eq!(err.kind(), FailureKind::IdentityReconcileFailed);
    assert_eq!(err.code(), "identity_conflict");
    assert_eq!(err.status(), StatusCode::CONFLICT);

    let err: AppError = StoreError::Backend("down".to_string()).into();
    assert_eq!(err.code(), "identity_reconcile_failed");
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_verification_error_codes() {
    assert_eq!(
        AppError::TokenVerification(VerificationError::Expired).code(),
        "token_expired"
    );
    for e in [
        VerificationError::BadSignature,
        VerificationError::UnknownKeyId,
        VerificationError::Malformed,
    ] {
        let err = AppError::TokenVerification(e);
        assert_eq!(err.code(), "invalid_token");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}

#[test]
fn test_upstream_failures_are_bad_gateway() {
    for err in [
        AppError::BrokerUnreachable("x".to_string()),
        AppError::ExchangeFailed("x".to_string()),
        AppError::ProfileFetchFailed("x".to_string()),
    ] {
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}

#[test]
fn test_callback_error_redirects_to_verified_target() {
    let target = Url::parse("https://app.example.com/done?tab=2").unwrap();
    let response =
        CallbackError::new(AppError::ExchangeFailed("denied".to_string()), Some(target))
            .into_response();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://app.example.com/done?tab=2&error=exchange_failed"
    );
}

#[test]
fn test_callback_error_without_target_is_plain_error() {
    let response = CallbackError::bare(AppError::InvalidState(StateError::BadSignature))
        .into_response();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::LOCATION).is_none());
}

#[tokio::test]
async fn test_internal_details_not_exposed() {
    let response = AppError::Internal(anyhow::anyhow!("db password is hunter2")).into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("internal_error"));
    assert!(!body.contains("hunter2"));
}
