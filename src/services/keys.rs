// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! RSA key material for signing and verifying first-party tokens.
//!
//! Exactly one private key is active for signing. Any number of public keys
//! may be registered for verification, so tokens signed before a rotation
//! keep verifying until their key is retired.

use std::collections::HashMap;

use jsonwebtoken::{crypto, Algorithm, DecodingKey, EncodingKey};
use serde::Serialize;

use crate::config::SigningKeyConfig;

pub const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

/// Key store errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid private key {kid}: {reason}")]
    InvalidPrivateKey { kid: String, reason: String },

    #[error("invalid public key {kid}: {reason}")]
    InvalidPublicKey { kid: String, reason: String },

    #[error("public key {0} does not match its private key")]
    Mismatch(String),

    #[error("key id must not be empty")]
    EmptyKeyId,

    #[error("key {0} is the active signing key and cannot be retired")]
    ActiveKey(String),

    #[error("unknown key id: {0}")]
    UnknownKey(String),
}

#[derive(Clone)]
struct ActiveKey {
    kid: String,
    encoding: EncodingKey,
}

#[derive(Clone)]
struct VerificationKey {
    decoding: DecodingKey,
    pem: String,
}

/// Public key as published on `/token/keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicKeyInfo {
    pub kid: String,
    pub alg: &'static str,
    #[serde(rename = "use")]
    pub use_: &'static str,
    pub key: String,
}

/// Signing key plus verification keys, indexed by key id.
#[derive(Clone)]
pub struct KeyStore {
    active: ActiveKey,
    verification: HashMap<String, VerificationKey>,
}

impl KeyStore {
    /// Create a store whose only key is `kid`, active for signing.
    pub fn new(kid: &str, private_pem: &str, public_pem: &str) -> Result<Self, KeyError> {
        let (active, verification) = load_pair(kid, private_pem, public_pem)?;

        let mut keys = HashMap::new();
        keys.insert(kid.to_string(), verification);

        Ok(Self {
            active,
            verification: keys,
        })
    }

    pub fn from_config(config: &SigningKeyConfig) -> Result<Self, KeyError> {
        let mut store = Self::new(&config.key_id, &config.private_pem, &config.public_pem)?;
        if let Some((kid, pem)) = &config.previous {
            store.add_verification_key(kid, pem)?;
        }
        Ok(store)
    }

    /// Register a public key for verification only.
    pub fn add_verification_key(&mut self, kid: &str, public_pem: &str) -> Result<(), KeyError> {
        if kid.trim().is_empty() {
            return Err(KeyError::EmptyKeyId);
        }
        let key = load_public(kid, public_pem)?;
        self.verification.insert(kid.to_string(), key);
        Ok(())
    }

    /// Copy of this store with `kid` as the new active signing key.
    ///
    /// The previously active key stops signing but stays registered for
    /// verification until [`KeyStore::retire`] removes it.
    pub fn rotated(&self, kid: &str, private_pem: &str, public_pem: &str) -> Result<Self, KeyError> {
        let (active, verification) = load_pair(kid, private_pem, public_pem)?;

        let mut next = self.clone();
        next.verification.insert(kid.to_string(), verification);
        next.active = active;
        Ok(next)
    }

    /// Copy of this store without the verification key `kid`.
    pub fn retire(&self, kid: &str) -> Result<Self, KeyError> {
        if kid == self.active.kid {
            return Err(KeyError::ActiveKey(kid.to_string()));
        }
        if !self.verification.contains_key(kid) {
            return Err(KeyError::UnknownKey(kid.to_string()));
        }

        let mut next = self.clone();
        next.verification.remove(kid);
        Ok(next)
    }

    /// Key id and key used for signing. Only ever the active key.
    pub fn signing_key(&self) -> (&str, &EncodingKey) {
        (&self.active.kid, &self.active.encoding)
    }

    pub fn active_kid(&self) -> &str {
        &self.active.kid
    }

    pub fn decoding_key(&self, kid: &str) -> Option<&DecodingKey> {
        self.verification.get(kid).map(|k| &k.decoding)
    }

    /// All verification keys, sorted by key id.
    pub fn public_keys(&self) -> Vec<PublicKeyInfo> {
        let mut keys: Vec<PublicKeyInfo> = self
            .verification
            .iter()
            .map(|(kid, key)| PublicKeyInfo {
                kid: kid.clone(),
                alg: "RS256",
                use_: "sig",
                key: key.pem.clone(),
            })
            .collect();
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        keys
    }
}

fn load_public(kid: &str, public_pem: &str) -> Result<VerificationKey, KeyError> {
    let decoding =
        DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(|e| KeyError::InvalidPublicKey {
            kid: kid.to_string(),
            reason: e.to_string(),
        })?;

    Ok(VerificationKey {
        decoding,
        pem: public_pem.trim().to_string(),
    })
}

fn load_pair(
    kid: &str,
    private_pem: &str,
    public_pem: &str,
) -> Result<(ActiveKey, VerificationKey), KeyError> {
    if kid.trim().is_empty() {
        return Err(KeyError::EmptyKeyId);
    }

    let encoding =
        EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(|e| KeyError::InvalidPrivateKey {
            kid: kid.to_string(),
            reason: e.to_string(),
        })?;
    let verification = load_public(kid, public_pem)?;

    // Sign a probe so a mismatched pair fails at load, not at first login.
    let probe = format!("key-probe:{kid}");
    let signature = crypto::sign(probe.as_bytes(), &encoding, SIGNING_ALGORITHM).map_err(|e| {
        KeyError::InvalidPrivateKey {
            kid: kid.to_string(),
            reason: e.to_string(),
        }
    })?;
    let matches = crypto::verify(
        &signature,
        probe.as_bytes(),
        &verification.decoding,
        SIGNING_ALGORITHM,
    )
    .unwrap_or(false);
    if !matches {
        return Err(KeyError::Mismatch(kid.to_string()));
    }

    Ok((
        ActiveKey {
            kid: kid.to_string(),
            encoding,
        },
        verification,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY_PRIVATE: &str = include_str!("../../tests/fixtures/primary_private.pem");
    const PRIMARY_PUBLIC: &str = include_str!("../../tests/fixtures/primary_public.pem");
    const SECONDARY_PRIVATE: &str = include_str!("../../tests/fixtures/secondary_private.pem");
    const SECONDARY_PUBLIC: &str = include_str!("../../tests/fixtures/secondary_public.pem");

    #[test]
    fn test_new_store_signs_with_its_only_key() {
        let store = KeyStore::new("k1", PRIMARY_PRIVATE, PRIMARY_PUBLIC).unwrap();
        assert_eq!(store.signing_key().0, "k1");
        assert!(store.decoding_key("k1").is_some());
        assert!(store.decoding_key("k2").is_none());
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let result = KeyStore::new("k1", PRIMARY_PRIVATE, SECONDARY_PUBLIC);
        assert!(matches!(result, Err(KeyError::Mismatch(kid)) if kid == "k1"));
    }

    #[test]
    fn test_garbage_pem_rejected() {
        assert!(matches!(
            KeyStore::new("k1", "not a key", PRIMARY_PUBLIC),
            Err(KeyError::InvalidPrivateKey { .. })
        ));
        assert!(matches!(
            KeyStore::new("k1", PRIMARY_PRIVATE, "not a key"),
            Err(KeyError::InvalidPublicKey { .. })
        ));
        assert!(matches!(
            KeyStore::new(" ", PRIMARY_PRIVATE, PRIMARY_PUBLIC),
            Err(KeyError::EmptyKeyId)
        ));
    }

    #[test]
    fn test_rotation_keeps_old_key_for_verification_only() {
        let store = KeyStore::new("k1", PRIMARY_PRIVATE, PRIMARY_PUBLIC).unwrap();
        let rotated = store.rotated("k2", SECONDARY_PRIVATE, SECONDARY_PUBLIC).unwrap();

        assert_eq!(rotated.active_kid(), "k2");
        assert!(rotated.decoding_key("k1").is_some());
        assert!(rotated.decoding_key("k2").is_some());
        // the original store is untouched
        assert_eq!(store.active_kid(), "k1");

        let kids: Vec<String> = rotated.public_keys().into_iter().map(|k| k.kid).collect();
        assert_eq!(kids, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn test_retire() {
        let store = KeyStore::new("k1", PRIMARY_PRIVATE, PRIMARY_PUBLIC)
            .unwrap()
            .rotated("k2", SECONDARY_PRIVATE, SECONDARY_PUBLIC)
            .unwrap();

        assert!(matches!(store.retire("k2"), Err(KeyError::ActiveKey(_))));
        assert!(matches!(store.retire("nope"), Err(KeyError::UnknownKey(_))));

        let retired = store.retire("k1").unwrap();
        assert!(retired.decoding_key("k1").is_none());
        assert_eq!(retired.public_keys().len(), 1);
    }

    #[test]
    fn test_from_config_registers_previous_key() {
        let config = SigningKeyConfig {
            key_id: "k2".to_string(),
            private_pem: SECONDARY_PRIVATE.to_string(),
            public_pem: SECONDARY_PUBLIC.to_string(),
            previous: Some(("k1".to_string(), PRIMARY_PUBLIC.to_string())),
        };
        let store = KeyStore::from_config(&config).unwrap();
        assert_eq!(store.active_kid(), "k2");
        assert!(store.decoding_key("k1").is_some());
    }
}
