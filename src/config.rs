//! Application configuration loaded from environment variables.
//!
//! Everything an orchestrator needs is handed to it as an explicit
//! [`BrokerConfig`] value; nothing below the router reads the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::tokens::OFFLINE_ACCESS;

/// Upper bound on profile-fetch retries after the first attempt.
pub const MAX_PROFILE_FETCH_RETRIES: u32 = 2;

/// OAuth client configuration for the Keycloak broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Authorization endpoint (browser redirect target)
    pub auth_url: String,
    /// Token endpoint (code exchange)
    pub token_url: String,
    /// Userinfo endpoint (profile fetch)
    pub profile_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Scopes always requested, in addition to caller-requested ones
    pub base_scopes: Vec<String>,
    /// Identity-provider aliases that may be linked to an existing identity
    pub link_providers: Vec<String>,
    /// Public base URL of this service (broker `redirect_uri` base, token issuer)
    pub public_url: String,
    /// Timeout for each broker HTTP round trip
    pub http_timeout: Duration,
    /// Retries after a transient profile-fetch failure (at most 2)
    pub profile_fetch_retries: u32,
    /// Backoff before the n-th retry is `n * profile_fetch_backoff`
    pub profile_fetch_backoff: Duration,
}

impl BrokerConfig {
    /// Broker callback for the login flow.
    pub fn login_callback_url(&self) -> String {
        format!("{}/login/callback", self.public_url.trim_end_matches('/'))
    }

    /// Broker callback for the link flow.
    pub fn link_callback_url(&self) -> String {
        format!("{}/link/callback", self.public_url.trim_end_matches('/'))
    }

    /// Confirmation leg of the link flow (`/link`).
    pub fn link_url(&self) -> String {
        format!("{}/link", self.public_url.trim_end_matches('/'))
    }
}

/// RSA key material for token signing.
#[derive(Debug, Clone)]
pub struct SigningKeyConfig {
    pub key_id: String,
    /// PEM (PKCS#1 or PKCS#8) private key
    pub private_pem: String,
    /// PEM public key
    pub public_pem: String,
    /// Previous key kept for verification during a rotation grace period
    pub previous: Option<(String, String)>,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    pub broker: BrokerConfig,
    pub signing: SigningKeyConfig,
    /// Regexes a client redirect target must fully match
    pub valid_redirect_patterns: Vec<String>,
    /// Used when `/login` gets neither `redirect` nor `Referer`
    pub default_redirect_url: String,
    /// Where deprovisioned users are sent after login
    pub not_approved_redirect_url: Option<String>,
    /// HMAC key for the login `state` parameter (raw bytes)
    pub state_secret: Vec<u8>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub link_session_ttl: Duration,
    pub login_state_ttl: Duration,
    /// Deadline for a whole inbound request
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let public_url = env::var("PUBLIC_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

        let broker = BrokerConfig {
            auth_url: required("KEYCLOAK_AUTH_URL")?,
            token_url: required("KEYCLOAK_TOKEN_URL")?,
            profile_url: required("KEYCLOAK_PROFILE_URL")?,
            client_id: required("KEYCLOAK_CLIENT_ID")?,
            client_secret: required("KEYCLOAK_CLIENT_SECRET")?.trim().to_string(),
            base_scopes: base_scopes(list("KEYCLOAK_SCOPES").unwrap_or_default())?,
            link_providers: list("LINK_PROVIDERS")
                .unwrap_or_else(|| vec!["github".to_string(), "openshift-v3".to_string()]),
            public_url: public_url.trim_end_matches('/').to_string(),
            http_timeout: Duration::from_secs(parsed("HTTP_TIMEOUT_SECS", 10)?),
            profile_fetch_retries: parsed::<u32>("PROFILE_FETCH_RETRIES", MAX_PROFILE_FETCH_RETRIES)?
                .min(MAX_PROFILE_FETCH_RETRIES),
            profile_fetch_backoff: Duration::from_millis(parsed("PROFILE_FETCH_BACKOFF_MS", 200)?),
        };

        let previous = match (env::var("PREVIOUS_KEY_ID"), env::var("PREVIOUS_PUBLIC_KEY")) {
            (Ok(kid), Ok(pem)) => Some((kid, pem)),
            _ => None,
        };

        let signing = SigningKeyConfig {
            key_id: required("SIGNING_KEY_ID")?,
            private_pem: required("SIGNING_PRIVATE_KEY")?,
            public_pem: required("SIGNING_PUBLIC_KEY")?,
            previous,
        };

        let valid_redirect_patterns =
            list("VALID_REDIRECT_PATTERNS").ok_or(ConfigError::Missing("VALID_REDIRECT_PATTERNS"))?;

        Ok(Self {
            port: parsed("PORT", 8080)?,
            broker,
            signing,
            valid_redirect_patterns,
            default_redirect_url: env::var("DEFAULT_REDIRECT_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            not_approved_redirect_url: env::var("NOT_APPROVED_REDIRECT_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            state_secret: required("STATE_SECRET")?.trim().as_bytes().to_vec(),
            access_token_ttl: Duration::from_secs(parsed("ACCESS_TOKEN_TTL_SECS", 30 * 24 * 60 * 60)?),
            refresh_token_ttl: Duration::from_secs(parsed(
                "REFRESH_TOKEN_TTL_SECS",
                90 * 24 * 60 * 60,
            )?),
            link_session_ttl: Duration::from_secs(parsed("LINK_SESSION_TTL_SECS", 300)?),
            login_state_ttl: Duration::from_secs(parsed("LOGIN_STATE_TTL_SECS", 600)?),
            request_timeout: Duration::from_secs(parsed("REQUEST_TIMEOUT_SECS", 30)?),
        })
    }

    /// Deterministic config for tests.
    ///
    /// Broker endpoints point at `broker_base` (a mock server in integration
    /// tests); signing keys come from `tests/fixtures`.
    pub fn test_default_with_broker(broker_base: &str) -> Self {
        let broker_base = broker_base.trim_end_matches('/');
        Self {
            port: 8080,
            broker: BrokerConfig {
                auth_url: format!("{broker_base}/auth/realms/test/protocol/openid-connect/auth"),
                token_url: format!("{broker_base}/auth/realms/test/protocol/openid-connect/token"),
                profile_url: format!(
                    "{broker_base}/auth/realms/test/protocol/openid-connect/userinfo"
                ),
                client_id: "test-client".to_string(),
                client_secret: "test_secret".to_string(),
                base_scopes: Vec::new(),
                link_providers: vec!["github".to_string(), "openshift-v3".to_string()],
                public_url: "http://localhost:8080".to_string(),
                http_timeout: Duration::from_secs(2),
                profile_fetch_retries: MAX_PROFILE_FETCH_RETRIES,
                profile_fetch_backoff: Duration::from_millis(10),
            },
            signing: SigningKeyConfig {
                key_id: "primary".to_string(),
                private_pem: include_str!("../tests/fixtures/primary_private.pem").to_string(),
                public_pem: include_str!("../tests/fixtures/primary_public.pem").to_string(),
                previous: None,
            },
            valid_redirect_patterns: vec![
                r"^https?://localhost(:\d+)?(/.*)?$".to_string(),
                r"^https://([^/]+\.)?example\.com(/.*)?$".to_string(),
            ],
            default_redirect_url: "http://localhost:3000".to_string(),
            not_approved_redirect_url: None,
            state_secret: b"test_state_secret_32_bytes_long!".to_vec(),
            access_token_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            link_session_ttl: Duration::from_secs(300),
            login_state_ttl: Duration::from_secs(600),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Test config whose broker is not expected to be contacted.
    pub fn test_default() -> Self {
        Self::test_default_with_broker("http://127.0.0.1:9")
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn list(name: &str) -> Option<Vec<String>> {
    let raw = env::var(name).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Scopes added to every authorization request. Long-lived access is only
/// ever requested per login, so `offline_access` is refused here.
fn base_scopes(scopes: Vec<String>) -> Result<Vec<String>, ConfigError> {
    if scopes
        .iter()
        .flat_map(|s| s.split_whitespace())
        .any(|s| s == OFFLINE_ACCESS)
    {
        return Err(ConfigError::Invalid("KEYCLOAK_SCOPES"));
    }
    Ok(scopes)
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
