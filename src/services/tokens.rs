// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Minting and verification of first-party signed tokens.
//!
//! All tokens are RS256 JWTs carrying the signing key id in their header.
//! Each token has a `typ` claim so that a refresh token or linking session
//! can never be presented where an access token is expected.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::{decode, decode_header, encode, errors::ErrorKind, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Identity;
use crate::services::keys::{KeyError, KeyStore, PublicKeyInfo, SIGNING_ALGORITHM};

/// Scope that asks for long-lived (refresh-capable) access.
pub const OFFLINE_ACCESS: &str = "offline_access";

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("claims could not be encoded: {0}")]
    MalformedClaims(String),

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("token expired")]
    Expired,

    #[error("bad signature")]
    BadSignature,

    #[error("unknown key id")]
    UnknownKeyId,

    #[error("malformed token")]
    Malformed,
}

/// Role a token plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    LinkSession,
}

/// Claims types this manager can sign and verify.
pub trait TokenClaims: Serialize + DeserializeOwned {
    const TYPE: TokenType;

    fn token_type(&self) -> TokenType;
}

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub jti: String,
    pub iss: String,
    /// Internal identity id
    pub sub: Uuid,
    pub iat: u64,
    pub exp: u64,
    pub typ: TokenType,
    /// Space-separated scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub preferred_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AccessClaims {
    pub fn scopes(&self) -> Vec<String> {
        split_scopes(self.scope.as_deref())
    }
}

impl TokenClaims for AccessClaims {
    const TYPE: TokenType = TokenType::Access;

    fn token_type(&self) -> TokenType {
        self.typ
    }
}

/// Refresh token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub jti: String,
    pub iss: String,
    pub sub: Uuid,
    pub iat: u64,
    pub exp: u64,
    pub typ: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl RefreshClaims {
    pub fn scopes(&self) -> Vec<String> {
        split_scopes(self.scope.as_deref())
    }
}

impl TokenClaims for RefreshClaims {
    const TYPE: TokenType = TokenType::Refresh;

    fn token_type(&self) -> TokenType {
        self.typ
    }
}

/// Stateless context carried across the three legs of the link flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkingSession {
    pub jti: String,
    pub iss: String,
    /// Identity the new account will be attached to
    pub sub: Uuid,
    /// Identity-provider alias to link
    pub provider: String,
    pub client_id: String,
    /// Already validated client redirect target
    pub redirect: String,
    pub iat: u64,
    pub exp: u64,
    pub typ: TokenType,
}

impl TokenClaims for LinkingSession {
    const TYPE: TokenType = TokenType::LinkSession;

    fn token_type(&self) -> TokenType {
        self.typ
    }
}

/// Token set handed to the client after login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub token_type: &'static str,
    /// Seconds until the access token expires
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
}

/// Token lifetimes.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub link_session: Duration,
}

/// Signs and verifies tokens with the current [`KeyStore`].
pub struct TokenManager {
    keys: ArcSwap<KeyStore>,
    issuer: String,
    lifetimes: TokenLifetimes,
}

impl TokenManager {
    pub fn new(keys: KeyStore, issuer: impl Into<String>, lifetimes: TokenLifetimes) -> Self {
        Self {
            keys: ArcSwap::from_pointee(keys),
            issuer: issuer.into(),
            lifetimes,
        }
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Snapshot of the key store in use.
    pub fn keys(&self) -> Arc<KeyStore> {
        self.keys.load_full()
    }

    /// Make `kid` the active signing key; the previous key keeps verifying.
    pub fn rotate(&self, kid: &str, private_pem: &str, public_pem: &str) -> Result<(), KeyError> {
        let next = self.keys.load().rotated(kid, private_pem, public_pem)?;
        self.keys.store(Arc::new(next));
        tracing::info!(kid, "Signing key rotated");
        Ok(())
    }

    /// Stop accepting tokens signed with `kid`.
    pub fn retire(&self, kid: &str) -> Result<(), KeyError> {
        let next = self.keys.load().retire(kid)?;
        self.keys.store(Arc::new(next));
        tracing::info!(kid, "Verification key retired");
        Ok(())
    }

    pub fn public_keys(&self) -> Vec<PublicKeyInfo> {
        self.keys.load().public_keys()
    }

    /// Sign `claims` with the active key.
    pub fn sign<C: TokenClaims>(&self, claims: &C) -> Result<String, SigningError> {
        let keys = self.keys.load();
        let (kid, key) = keys.signing_key();

        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(kid.to_string());

        encode(&header, claims, key).map_err(|e| match e.kind() {
            ErrorKind::Json(_) => SigningError::MalformedClaims(e.to_string()),
            _ => SigningError::KeyUnavailable(e.to_string()),
        })
    }

    /// Verify `token` and decode it as `C`.
    ///
    /// The key is picked by the header's `kid`. Signature, then expiry and
    /// issuer, are checked on the raw claims; only then is the payload read
    /// as `C` and its token type compared. A token is rejected from `exp` on.
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Result<C, VerificationError> {
        let header = decode_header(token).map_err(|_| VerificationError::Malformed)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(VerificationError::Malformed);
        }
        let kid = header.kid.ok_or(VerificationError::UnknownKeyId)?;

        let keys = self.keys.load();
        let key = keys
            .decoding_key(&kid)
            .ok_or(VerificationError::UnknownKeyId)?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_aud = false;
        validation.leeway = 0;

        let data =
            decode::<serde_json::Value>(token, key, &validation).map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => VerificationError::BadSignature,
                ErrorKind::ExpiredSignature => VerificationError::Expired,
                _ => VerificationError::Malformed,
            })?;

        let claims: C =
            serde_json::from_value(data.claims).map_err(|_| VerificationError::Malformed)?;
        if claims.token_type() != C::TYPE {
            return Err(VerificationError::Malformed);
        }

        Ok(claims)
    }

    /// Access token (plus refresh token when `offline_access` was requested).
    pub fn issue_tokens(
        &self,
        identity: &Identity,
        scopes: &[String],
    ) -> Result<IssuedTokens, SigningError> {
        let now = now_unix_secs();
        let scope = join_scopes(scopes);

        let access = AccessClaims {
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            sub: identity.id,
            iat: now,
            exp: now + self.lifetimes.access.as_secs(),
            typ: TokenType::Access,
            scope: scope.clone(),
            preferred_username: identity.username.clone(),
            email: identity.email.clone(),
            name: identity.full_name.clone(),
        };

        let refresh = if scopes.iter().any(|s| s == OFFLINE_ACCESS) {
            let claims = RefreshClaims {
                jti: Uuid::new_v4().to_string(),
                iss: self.issuer.clone(),
                sub: identity.id,
                iat: now,
                exp: now + self.lifetimes.refresh.as_secs(),
                typ: TokenType::Refresh,
                scope,
            };
            Some(self.sign(&claims)?)
        } else {
            None
        };

        Ok(IssuedTokens {
            access_token: self.sign(&access)?,
            token_type: "Bearer",
            expires_in: self.lifetimes.access.as_secs(),
            refresh_expires_in: refresh.as_ref().map(|_| self.lifetimes.refresh.as_secs()),
            refresh_token: refresh,
        })
    }

    /// Linking session issued now.
    pub fn linking_session(
        &self,
        identity_id: Uuid,
        provider: &str,
        client_id: &str,
        redirect: &str,
    ) -> LinkingSession {
        self.linking_session_at(identity_id, provider, client_id, redirect, now_unix_secs())
    }

    /// Linking session issued at `issued_at` (unix seconds).
    pub fn linking_session_at(
        &self,
        identity_id: Uuid,
        provider: &str,
        client_id: &str,
        redirect: &str,
        issued_at: u64,
    ) -> LinkingSession {
        LinkingSession {
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            sub: identity_id,
            provider: provider.to_string(),
            client_id: client_id.to_string(),
            redirect: redirect.to_string(),
            iat: issued_at,
            exp: issued_at + self.lifetimes.link_session.as_secs(),
            typ: TokenType::LinkSession,
        }
    }
}

fn join_scopes(scopes: &[String]) -> Option<String> {
    (!scopes.is_empty()).then(|| scopes.join(" "))
}

fn split_scopes(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

pub(crate) fn now_unix_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
