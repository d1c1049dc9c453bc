// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth2 authorization-code client for the identity broker.
//!
//! Handles:
//! - Authorization URL composition (scopes, `state`, provider hint)
//! - Code exchange (single attempt; codes are single-use)
//! - Profile fetch (bounded retry on transient network failures only)

use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::config::{BrokerConfig, MAX_PROFILE_FETCH_RETRIES};
use crate::error::AppError;
use crate::models::ProviderProfile;

/// Parameters of one authorization redirect.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    /// Where the broker sends the user back to (our callback)
    pub redirect_uri: &'a str,
    /// Caller-requested scopes (added to the configured base scopes)
    pub scopes: &'a [String],
    /// Opaque, integrity-protected state
    pub state: &'a str,
    /// Upstream identity provider the broker should go straight to
    pub idp_hint: Option<&'a str>,
}

/// Token response from the broker's token endpoint.
#[derive(Clone, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderToken")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Keycloak (OIDC) broker client.
#[derive(Clone)]
pub struct KeycloakBroker {
    http: reqwest::Client,
    config: Arc<BrokerConfig>,
}

impl KeycloakBroker {
    pub const PROVIDER: &'static str = "keycloak";

    pub fn new(config: Arc<BrokerConfig>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("failed building broker HTTP client")?;

        Ok(Self { http, config })
    }

    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Result<String, AppError> {
        let mut url = Url::parse(&self.config.auth_url).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Invalid broker authorization URL: {}", e))
        })?;

        // Scopes are rebuilt on every call from immutable config.
        let mut scopes: Vec<&str> = Vec::new();
        for scope in request
            .scopes
            .iter()
            .chain(self.config.base_scopes.iter())
        {
            if !scopes.contains(&scope.as_str()) {
                scopes.push(scope);
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", request.redirect_uri)
                .append_pair("response_type", "code");
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
            query.append_pair("state", request.state);
            if let Some(hint) = request.idp_hint {
                query.append_pair("kc_idp_hint", hint);
            }
        }

        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<ProviderToken, AppError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::BrokerUnreachable(format!("Token exchange request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Broker token exchange failed");
            return Err(AppError::ExchangeFailed(format!(
                "Token exchange failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ExchangeFailed(format!("Failed to parse token response: {}", e)))
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, AppError> {
        let retries = self.config.profile_fetch_retries.min(MAX_PROFILE_FETCH_RETRIES);
        let mut attempt: u32 = 0;

        loop {
            let sent = self
                .http
                .get(&self.config.profile_url)
                .bearer_auth(&token.access_token)
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    return response.json().await.map_err(|e| {
                        AppError::ProfileFetchFailed(format!("Failed to parse profile: {}", e))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(status = %status, body = %body, "Broker profile request rejected");
                    return Err(AppError::ProfileFetchFailed(format!("HTTP {}", status)));
                }
                Err(e) if is_transient(&e) && attempt < retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "Transient profile fetch failure, retrying");
                    tokio::time::sleep(self.config.profile_fetch_backoff * attempt).await;
                }
                Err(e) => {
                    return Err(AppError::BrokerUnreachable(format!(
                        "Profile request failed after {} attempt(s): {}",
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// The identity brokers this service can talk to.
#[derive(Clone)]
pub enum OAuthBroker {
    Keycloak(KeycloakBroker),
}

impl OAuthBroker {
    pub fn keycloak(config: Arc<BrokerConfig>) -> anyhow::Result<Self> {
        Ok(Self::Keycloak(KeycloakBroker::new(config)?))
    }

    /// Provider name recorded on identities created through this broker.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Keycloak(_) => KeycloakBroker::PROVIDER,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        match self {
            Self::Keycloak(kc) => &kc.config,
        }
    }

    /// Authorization endpoint URL for one redirect.
    pub fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Result<String, AppError> {
        match self {
            Self::Keycloak(kc) => kc.authorization_url(request),
        }
    }

    /// Exchange an authorization code. Never retried.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderToken, AppError> {
        match self {
            Self::Keycloak(kc) => kc.exchange_code(code, redirect_uri).await,
        }
    }

    /// Fetch the profile of the user `token` belongs to.
    pub async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, AppError> {
        match self {
            Self::Keycloak(kc) => kc.fetch_profile(token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn broker(base_scopes: &[&str]) -> OAuthBroker {
        let mut config = Config::test_default().broker;
        config.base_scopes = base_scopes.iter().map(|s| s.to_string()).collect();
        OAuthBroker::keycloak(Arc::new(config)).unwrap()
    }

    fn query(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_authorization_url_without_scopes() {
        let url = broker(&[])
            .authorization_url(&AuthorizationRequest {
                redirect_uri: "http://localhost:8080/login/callback",
                scopes: &[],
                state: "abc",
                idp_hint: None,
            })
            .unwrap();

        assert!(!url.contains("scope="));
        assert_eq!(
            query(&url),
            vec![
                ("client_id".to_string(), "test-client".to_string()),
                (
                    "redirect_uri".to_string(),
                    "http://localhost:8080/login/callback".to_string()
                ),
                ("response_type".to_string(), "code".to_string()),
                ("state".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_authorization_url_offline_access() {
        let b = broker(&[]);
        let scopes = vec!["offline_access".to_string()];
        let url = b
            .authorization_url(&AuthorizationRequest {
                redirect_uri: "http://localhost:8080/login/callback",
                scopes: &scopes,
                state: "abc",
                idp_hint: None,
            })
            .unwrap();
        assert!(url.contains("scope=offline_access"));

        // nothing leaks into the next request
        let url = b
            .authorization_url(&AuthorizationRequest {
                redirect_uri: "http://localhost:8080/login/callback",
                scopes: &[],
                state: "abc",
                idp_hint: None,
            })
            .unwrap();
        assert!(!url.contains("offline_access"));
    }

    #[test]
    fn test_authorization_url_merges_base_scopes() {
        let scopes = vec!["offline_access".to_string(), "openid".to_string()];
        let url = broker(&["openid", "profile"])
            .authorization_url(&AuthorizationRequest {
                redirect_uri: "http://localhost:8080/link/callback",
                scopes: &scopes,
                state: "s",
                idp_hint: Some("github"),
            })
            .unwrap();

        let pairs = query(&url);
        assert!(pairs.contains(&(
            "scope".to_string(),
            "offline_access openid profile".to_string()
        )));
        assert!(pairs.contains(&("kc_idp_hint".to_string(), "github".to_string())));
    }

    #[test]
    fn test_provider_token_debug_hides_secrets() {
        let token = ProviderToken {
            access_token: "secret-access".to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(300),
            refresh_token: Some("secret-refresh".to_string()),
            scope: None,
        };
        let debug = format!("{:?}", token);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
