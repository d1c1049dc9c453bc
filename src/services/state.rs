// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integrity-protected OAuth `state` for the login flow.
//!
//! Wire format: `base64url(json "|" hex(hmac_sha256(json)))`. The state
//! carries everything the callback needs (client target, requested scopes),
//! so no server-side session is kept between the two legs.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::services::redirect::RedirectTarget;
use crate::services::tokens::now_unix_secs;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("state is malformed")]
    Malformed,

    #[error("state signature mismatch")]
    BadSignature,

    #[error("state expired")]
    Expired,

    #[error("state key rejected: {0}")]
    Key(String),
}

/// Context carried from `/login` to `/login/callback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    /// Validated client redirect target
    pub redirect: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Unix seconds
    pub issued_at: u64,
    /// Makes every state value unique
    pub nonce: String,
}

impl LoginState {
    pub fn new(redirect: &RedirectTarget, scopes: Vec<String>) -> Self {
        Self {
            redirect: redirect.as_str().to_string(),
            scopes,
            issued_at: now_unix_secs(),
            nonce: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Sign and encode for use as the OAuth `state` parameter.
    pub fn encode(&self, secret: &[u8]) -> Result<String, StateError> {
        let payload = serde_json::to_string(self).map_err(|_| StateError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(secret).map_err(|e| StateError::Key(e.to_string()))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let signed = format!("{}|{}", payload, signature);
        Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
    }

    /// Verify the signature and age of an encoded state.
    pub fn decode(state: &str, secret: &[u8], max_age: Duration) -> Result<Self, StateError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(state)
            .map_err(|_| StateError::Malformed)?;
        let signed = String::from_utf8(bytes).map_err(|_| StateError::Malformed)?;

        // The JSON may itself contain '|', the hex signature never does.
        let (payload, signature_hex) = signed.rsplit_once('|').ok_or(StateError::Malformed)?;
        let signature = hex::decode(signature_hex).map_err(|_| StateError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(secret).map_err(|e| StateError::Key(e.to_string()))?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            tracing::error!("OAuth state signature mismatch! Potential tampering.");
            return Err(StateError::BadSignature);
        }

        let decoded: LoginState =
            serde_json::from_str(payload).map_err(|_| StateError::Malformed)?;

        if now_unix_secs() > decoded.issued_at.saturating_add(max_age.as_secs()) {
            return Err(StateError::Expired);
        }

        Ok(decoded)
    }
}
