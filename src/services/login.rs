// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Primary login flow.
//!
//! `/login` validates the client target and sends the user to the broker;
//! `/login/callback` exchanges the code, reconciles the identity, mints our
//! own token and redirects back to the client with it. The two legs share
//! nothing but the signed `state` parameter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use url::Url;

use crate::config::Config;
use crate::db::IdentityStore;
use crate::error::{AppError, CallbackError, FailureKind};
use crate::services::broker::{AuthorizationRequest, OAuthBroker};
use crate::services::redirect::{RedirectPolicy, RedirectTarget};
use crate::services::state::LoginState;
use crate::services::tokens::{IssuedTokens, TokenManager, OFFLINE_ACCESS};

/// Position of one login flow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Initiated,
    AwaitingCallback,
    ProfileResolved,
    TokenIssued,
    Failed(FailureKind),
}

/// Query of the broker's redirect back to `/login/callback`.
#[derive(Debug, Clone, Default)]
pub struct LoginCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set when the user or the broker refused the authorization
    pub error: Option<String>,
}

pub struct LoginOrchestrator {
    broker: OAuthBroker,
    store: Arc<dyn IdentityStore>,
    tokens: Arc<TokenManager>,
    redirects: Arc<RedirectPolicy>,
    state_secret: Vec<u8>,
    state_ttl: Duration,
    default_redirect_url: String,
    not_approved_redirect_url: Option<Url>,
}

impl LoginOrchestrator {
    pub fn new(
        config: &Config,
        broker: OAuthBroker,
        store: Arc<dyn IdentityStore>,
        tokens: Arc<TokenManager>,
        redirects: Arc<RedirectPolicy>,
    ) -> anyhow::Result<Self> {
        let not_approved_redirect_url = config
            .not_approved_redirect_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("NOT_APPROVED_REDIRECT_URL is not a valid URL")?;

        Ok(Self {
            broker,
            store,
            tokens,
            redirects,
            state_secret: config.state_secret.clone(),
            state_ttl: config.login_state_ttl,
            default_redirect_url: config.default_redirect_url.clone(),
            not_approved_redirect_url,
        })
    }

    /// Broker authorization URL for a new login.
    ///
    /// The client target (`redirect`, or the configured default) is checked
    /// before anything else happens.
    pub fn initiate(&self, scopes: &[String], redirect: Option<&str>) -> Result<String, AppError> {
        let candidate = redirect.unwrap_or(&self.default_redirect_url);
        let target = self
            .redirects
            .validate(&self.broker.config().client_id, candidate)?;
        tracing::debug!(step = ?LoginStep::Initiated, redirect = %target.as_str(), "Login initiated");

        let scopes = normalize_scopes(scopes)?;
        let state = LoginState::new(&target, scopes.clone()).encode(&self.state_secret)?;

        let callback_url = self.broker.config().login_callback_url();
        let url = self.broker.authorization_url(&AuthorizationRequest {
            redirect_uri: &callback_url,
            scopes: &scopes,
            state: &state,
            idp_hint: None,
        })?;

        tracing::debug!(step = ?LoginStep::AwaitingCallback, "Redirecting to broker");
        Ok(url)
    }

    /// Finish a login and return the client URL carrying the issued token.
    pub async fn complete_callback(&self, callback: LoginCallback) -> Result<Url, CallbackError> {
        let result = self.complete(callback).await;
        if let Err(e) = &result {
            tracing::warn!(step = ?LoginStep::Failed(e.kind()), error = %e.error, "Login failed");
        }
        result
    }

    async fn complete(&self, callback: LoginCallback) -> Result<Url, CallbackError> {
        let raw_state = callback
            .state
            .ok_or_else(|| AppError::BadRequest("Missing state parameter".to_string()))?;
        let state = LoginState::decode(&raw_state, &self.state_secret, self.state_ttl)
            .map_err(AppError::from)?;

        // The allow-list may have changed since the state was issued.
        let target = self
            .redirects
            .validate(&self.broker.config().client_id, &state.redirect)?;
        let fail = |error: AppError| CallbackError::new(error, Some(target.url().clone()));

        if let Some(error) = callback.error {
            return Err(fail(AppError::ExchangeFailed(format!(
                "Broker returned error: {}",
                error
            ))));
        }
        let code = callback
            .code
            .ok_or_else(|| fail(AppError::BadRequest("Missing code parameter".to_string())))?;

        let callback_url = self.broker.config().login_callback_url();
        let provider_token = self
            .broker
            .exchange_code(&code, &callback_url)
            .await
            .map_err(fail)?;
        let profile = self
            .broker
            .fetch_profile(&provider_token)
            .await
            .map_err(fail)?;
        tracing::debug!(step = ?LoginStep::ProfileResolved, subject = %profile.subject, "Broker profile fetched");

        let (identity, user) = self
            .store
            .create_or_update(self.broker.provider(), &profile.subject, &profile)
            .await
            .map_err(|e| fail(e.into()))?;

        if !identity.is_active() {
            let redirect = self
                .not_approved_redirect_url
                .clone()
                .or_else(|| Some(target.url().clone()));
            return Err(CallbackError::new(AppError::AccountDeprovisioned, redirect));
        }

        let issued = self
            .tokens
            .issue_tokens(&identity, &state.scopes)
            .map_err(|e| fail(e.into()))?;

        tracing::info!(
            step = ?LoginStep::TokenIssued,
            identity_id = %identity.id,
            user_id = %user.id,
            refresh = issued.refresh_token.is_some(),
            "Login complete"
        );

        Ok(token_redirect(&target, &issued))
    }
}

/// Only `offline_access` may be requested; duplicates are dropped.
fn normalize_scopes(requested: &[String]) -> Result<Vec<String>, AppError> {
    let mut scopes: Vec<String> = Vec::new();
    for scope in requested.iter().flat_map(|s| s.split_whitespace()) {
        if scope != OFFLINE_ACCESS {
            return Err(AppError::InvalidScope(scope.to_string()));
        }
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    Ok(scopes)
}

fn token_redirect(target: &RedirectTarget, issued: &IssuedTokens) -> Url {
    let expires_in = issued.expires_in.to_string();
    let mut params = vec![
        ("access_token", issued.access_token.as_str()),
        ("token_type", issued.token_type),
        ("expires_in", expires_in.as_str()),
    ];
    if let Some(refresh) = &issued.refresh_token {
        params.push(("refresh_token", refresh.as_str()));
    }
    target.with_params(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryIdentityStore;
    use crate::services::keys::KeyStore;
    use crate::services::tokens::TokenLifetimes;

    fn orchestrator() -> LoginOrchestrator {
        let config = Config::test_default();
        let tokens = TokenManager::new(
            KeyStore::from_config(&config.signing).unwrap(),
            config.broker.public_url.clone(),
            TokenLifetimes {
                access: config.access_token_ttl,
                refresh: config.refresh_token_ttl,
                link_session: config.link_session_ttl,
            },
        );
        LoginOrchestrator::new(
            &config,
            OAuthBroker::keycloak(Arc::new(config.broker.clone())).unwrap(),
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(tokens),
            Arc::new(RedirectPolicy::from_config(&config).unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_scopes() {
        assert!(normalize_scopes(&[]).unwrap().is_empty());
        assert_eq!(
            normalize_scopes(&["offline_access offline_access".to_string()]).unwrap(),
            vec!["offline_access".to_string()]
        );
        assert!(matches!(
            normalize_scopes(&["openid".to_string()]),
            Err(AppError::InvalidScope(s)) if s == "openid"
        ));
    }

    #[test]
    fn test_initiate_uses_default_redirect() {
        let url = orchestrator().initiate(&[], None).unwrap();
        assert!(url.starts_with("http://127.0.0.1:9/auth/realms/test/protocol/openid-connect/auth?"));
        assert!(!url.contains("scope="));
    }

    #[test]
    fn test_initiate_rejects_unlisted_target() {
        let result = orchestrator().initiate(&[], Some("https://evil.test/"));
        assert!(matches!(result, Err(AppError::InvalidRedirectTarget(_))));
    }

    #[test]
    fn test_initiate_scope_does_not_leak() {
        let o = orchestrator();
        let with = o
            .initiate(&["offline_access".to_string()], Some("http://localhost:3000"))
            .unwrap();
        let without = o.initiate(&[], Some("http://localhost:3000")).unwrap();

        assert!(with.contains("scope=offline_access"));
        assert!(!without.contains("offline_access"));
    }

    #[tokio::test]
    async fn test_callback_without_state_is_bare_error() {
        let err = orchestrator()
            .complete_callback(LoginCallback {
                code: Some("code".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.redirect.is_none());
        assert!(matches!(err.error, AppError::BadRequest(_)));
    }
}
