// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Internal identity records and their external-provider links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ProviderProfile;

/// Whether the account behind an identity may still sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Active,
    Deprovisioned,
}

/// An external account attached to an identity.
///
/// `(provider, subject)` is unique across all identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLink {
    /// Provider alias ("keycloak", "github", ...)
    pub provider: String,
    /// Subject identifier assigned by that provider
    pub subject: String,
    pub linked_at: DateTime<Utc>,
}

/// Internal identity, the subject of every token this service issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable internal id (never changes once assigned)
    pub id: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub state: AccountState,
    pub links: Vec<ProviderLink>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// New active identity whose first link is `(provider, subject)`.
    pub fn from_profile(
        provider: &str,
        subject: &str,
        profile: &ProviderProfile,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: profile.username(),
            full_name: profile.full_name(),
            email: profile.email.clone(),
            image_url: profile.picture.clone(),
            state: AccountState::Active,
            links: vec![ProviderLink {
                provider: provider.to_string(),
                subject: subject.to_string(),
                linked_at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the profile snapshot from the latest provider profile.
    pub fn sync_profile(&mut self, profile: &ProviderProfile, now: DateTime<Utc>) {
        self.username = profile.username();
        self.full_name = profile.full_name();
        if profile.email.is_some() {
            self.email = profile.email.clone();
        }
        if profile.picture.is_some() {
            self.image_url = profile.picture.clone();
        }
        self.updated_at = now;
    }

    /// Whether `(provider, subject)` is already attached here.
    pub fn is_linked_to(&self, provider: &str, subject: &str) -> bool {
        self.links
            .iter()
            .any(|l| l.provider == provider && l.subject == subject)
    }

    pub fn is_active(&self) -> bool {
        self.state == AccountState::Active
    }
}
