// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Linking an additional provider account to an authenticated identity.
//!
//! Three legs, correlated only by a signed, short-lived [`LinkingSession`]:
//!
//! 1. `/link/session` mints the session and redirects to `/link?session=...`
//! 2. `/link` verifies it and redirects to the broker, using the session
//!    token itself as the OAuth `state`
//! 3. `/link/callback` re-verifies the session, exchanges the code and
//!    attaches the provider account to the session's identity

use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use crate::db::IdentityStore;
use crate::error::{AppError, CallbackError, FailureKind};
use crate::services::broker::{AuthorizationRequest, OAuthBroker};
use crate::services::redirect::RedirectPolicy;
use crate::services::tokens::{LinkingSession, TokenManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStep {
    SessionIssued,
    AwaitingCallback,
    ProfileResolved,
    Linked,
    Failed(FailureKind),
}

/// Query of the broker's redirect back to `/link/callback`.
#[derive(Debug, Clone, Default)]
pub struct LinkCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub struct LinkOrchestrator {
    broker: OAuthBroker,
    store: Arc<dyn IdentityStore>,
    tokens: Arc<TokenManager>,
    redirects: Arc<RedirectPolicy>,
}

impl LinkOrchestrator {
    pub fn new(
        broker: OAuthBroker,
        store: Arc<dyn IdentityStore>,
        tokens: Arc<TokenManager>,
        redirects: Arc<RedirectPolicy>,
    ) -> Self {
        Self {
            broker,
            store,
            tokens,
            redirects,
        }
    }

    /// Start linking `provider` to `identity_id`; returns the `/link` URL.
    pub fn session_init(
        &self,
        identity_id: Uuid,
        provider: &str,
        client_id: &str,
        redirect: &str,
    ) -> Result<String, AppError> {
        let target = self.redirects.validate(client_id, redirect)?;

        if !self
            .broker
            .config()
            .link_providers
            .iter()
            .any(|p| p == provider)
        {
            return Err(AppError::UnknownProvider(provider.to_string()));
        }

        let session =
            self.tokens
                .linking_session(identity_id, provider, client_id, target.as_str());
        let token = self.tokens.sign(&session)?;

        let mut url = Url::parse(&self.broker.config().link_url()).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Invalid link confirmation URL: {}", e))
        })?;
        url.query_pairs_mut().append_pair("session", &token);

        tracing::debug!(
            step = ?LinkStep::SessionIssued,
            identity_id = %identity_id,
            provider,
            "Linking session issued"
        );
        Ok(url.into())
    }

    /// Verify a linking session and return the broker authorization URL.
    pub fn link(&self, session_token: &str) -> Result<String, AppError> {
        let session: LinkingSession = self.tokens.verify(session_token)?;

        let callback_url = self.broker.config().link_callback_url();
        let url = self.broker.authorization_url(&AuthorizationRequest {
            redirect_uri: &callback_url,
            scopes: &[],
            state: session_token,
            idp_hint: Some(&session.provider),
        })?;

        tracing::debug!(
            step = ?LinkStep::AwaitingCallback,
            identity_id = %session.sub,
            provider = %session.provider,
            "Redirecting to broker for linking"
        );
        Ok(url)
    }

    /// Finish linking and return the client URL to redirect to.
    pub async fn link_callback(&self, callback: LinkCallback) -> Result<Url, CallbackError> {
        let result = self.complete(callback).await;
        if let Err(e) = &result {
            tracing::warn!(step = ?LinkStep::Failed(e.kind()), error = %e.error, "Linking failed");
        }
        result
    }

    async fn complete(&self, callback: LinkCallback) -> Result<Url, CallbackError> {
        let raw_state = callback
            .state
            .ok_or_else(|| AppError::BadRequest("Missing state parameter".to_string()))?;
        let session: LinkingSession = self.tokens.verify(&raw_state).map_err(AppError::from)?;

        let target = self
            .redirects
            .validate(&session.client_id, &session.redirect)?;
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

        // The identity may have been deprovisioned since the session was issued.
        match self.store.identity(session.sub).await.map_err(|e| fail(e.into()))? {
            Some(identity) if identity.is_active() => {}
            Some(_) => return Err(fail(AppError::AccountDeprovisioned)),
            None => return Err(fail(AppError::Unauthorized)),
        }

        let callback_url = self.broker.config().link_callback_url();
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
        tracing::debug!(
            step = ?LinkStep::ProfileResolved,
            subject = %profile.subject,
            "Broker profile fetched for linking"
        );

        let identity = self
            .store
            .link(session.sub, &session.provider, &profile.subject, &profile)
            .await
            .map_err(|e| fail(e.into()))?;

        tracing::info!(
            step = ?LinkStep::Linked,
            identity_id = %identity.id,
            provider = %session.provider,
            "Provider account linked"
        );

        Ok(target.with_params([("linked", session.provider.as_str())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::MemoryIdentityStore;
    use crate::services::keys::KeyStore;
    use crate::services::tokens::{TokenLifetimes, VerificationError};

    fn orchestrator() -> (LinkOrchestrator, Arc<TokenManager>) {
        let config = Config::test_default();
        let tokens = Arc::new(TokenManager::new(
            KeyStore::from_config(&config.signing).unwrap(),
            config.broker.public_url.clone(),
            TokenLifetimes {
                access: config.access_token_ttl,
                refresh: config.refresh_token_ttl,
                link_session: config.link_session_ttl,
            },
        ));
        let link = LinkOrchestrator::new(
            OAuthBroker::keycloak(Arc::new(config.broker.clone())).unwrap(),
            Arc::new(MemoryIdentityStore::new()),
            tokens.clone(),
            Arc::new(RedirectPolicy::from_config(&config).unwrap()),
        );
        (link, tokens)
    }

    fn session_param(url: &str) -> String {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "session")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_session_init_redirects_to_confirmation() {
        let (link, tokens) = orchestrator();
        let identity_id = Uuid::new_v4();
        let url = link
            .session_init(identity_id, "github", "test-client", "http://localhost:3000/settings")
            .unwrap();

        assert!(url.starts_with("http://localhost:8080/link?session="));
        let session: LinkingSession = tokens.verify(&session_param(&url)).unwrap();
        assert_eq!(session.sub, identity_id);
        assert_eq!(session.provider, "github");
        assert_eq!(session.redirect, "http://localhost:3000/settings");
    }

    #[test]
    fn test_session_init_rejects_bad_target_and_provider() {
        let (link, _) = orchestrator();
        let id = Uuid::new_v4();

        assert!(matches!(
            link.session_init(id, "github", "test-client", "https://evil.test/"),
            Err(AppError::InvalidRedirectTarget(_))
        ));
        assert!(matches!(
            link.session_init(id, "github", "unknown-client", "http://localhost:3000"),
            Err(AppError::InvalidRedirectTarget(_))
        ));
        assert!(matches!(
            link.session_init(id, "myspace", "test-client", "http://localhost:3000"),
            Err(AppError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_link_uses_session_as_state_and_hint() {
        let (link, _) = orchestrator();
        let init = link
            .session_init(Uuid::new_v4(), "openshift-v3", "test-client", "http://localhost:3000")
            .unwrap();
        let token = session_param(&init);

        let url = Url::parse(&link.link(&token).unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(pairs.contains(&("state".to_string(), token)));
        assert!(pairs.contains(&("kc_idp_hint".to_string(), "openshift-v3".to_string())));
        assert!(pairs.contains(&(
            "redirect_uri".to_string(),
            "http://localhost:8080/link/callback".to_string()
        )));
    }

    #[test]
    fn test_link_rejects_expired_session() {
        let (link, tokens) = orchestrator();
        let stale = tokens.linking_session_at(
            Uuid::new_v4(),
            "github",
            "test-client",
            "http://localhost:3000/",
            1_000_000,
        );
        let token = tokens.sign(&stale).unwrap();

        assert!(matches!(
            link.link(&token),
            Err(AppError::TokenVerification(VerificationError::Expired))
        ));
    }

    #[tokio::test]
    async fn test_callback_for_unknown_identity_redirects_with_error() {
        let (link, tokens) = orchestrator();
        let session =
            tokens.linking_session(Uuid::new_v4(), "github", "test-client", "http://localhost:3000/");
        let err = link
            .link_callback(LinkCallback {
                code: Some("code".to_string()),
                state: Some(tokens.sign(&session).unwrap()),
                error: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Unauthorized);
        assert_eq!(
            err.redirect.as_ref().map(Url::as_str),
            Some("http://localhost:3000/")
        );
    }

    #[tokio::test]
    async fn test_callback_with_forged_state_has_no_redirect() {
        let (link, _) = orchestrator();
        let err = link
            .link_callback(LinkCallback {
                code: Some("code".to_string()),
                state: Some("forged".to_string()),
                error: None,
            })
            .await
            .unwrap_err();

        assert!(err.redirect.is_none());
        assert_eq!(err.kind(), FailureKind::TokenVerificationFailed);
    }
}
