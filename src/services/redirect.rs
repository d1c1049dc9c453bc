// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client redirect allow-list (open-redirect prevention).

use std::collections::HashMap;

use regex::Regex;
use url::Url;

use crate::config::Config;
use crate::error::AppError;

/// A client redirect URL that passed the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget(Url);

impl RedirectTarget {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Target with extra query parameters appended.
    pub fn with_params<'a>(&self, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Url {
        let mut url = self.0.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }
}

/// Per-client regex allow-list of redirect targets.
#[derive(Debug, Clone, Default)]
pub struct RedirectPolicy {
    clients: HashMap<String, Vec<Regex>>,
}

impl RedirectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `patterns` for `client_id`. Each pattern must match the whole URL.
    pub fn with_client(mut self, client_id: &str, patterns: &[String]) -> Result<Self, regex::Error> {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{p})$")))
            .collect::<Result<Vec<_>, _>>()?;
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .extend(compiled);
        Ok(self)
    }

    pub fn from_config(config: &Config) -> Result<Self, regex::Error> {
        Self::new().with_client(&config.broker.client_id, &config.valid_redirect_patterns)
    }

    /// Check `candidate` against the patterns registered for `client_id`.
    pub fn validate(&self, client_id: &str, candidate: &str) -> Result<RedirectTarget, AppError> {
        let reject = || AppError::InvalidRedirectTarget(candidate.to_string());

        let url = Url::parse(candidate.trim()).map_err(|_| reject())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(reject());
        }
        // "https://trusted.example.com@evil.test" style targets
        if !url.username().is_empty() || url.password().is_some() {
            return Err(reject());
        }

        let patterns = self.clients.get(client_id).ok_or_else(reject)?;
        if patterns.iter().any(|re| re.is_match(url.as_str())) {
            Ok(RedirectTarget(url))
        } else {
            Err(reject())
        }
    }

    /// Whether a browser origin belongs to any allowed redirect target (CORS).
    pub fn allows_origin(&self, origin: &str) -> bool {
        let Ok(url) = Url::parse(origin) else {
            return false;
        };
        self.clients
            .values()
            .flatten()
            .any(|re| re.is_match(url.as_str()))
    }
}
