//! User account model, owned 1:1 by an identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Identity, ProviderProfile};

/// User profile, synced from the broker on every login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Owning identity
    pub identity_id: Uuid,
    /// Email address (may be None if not shared)
    pub email: Option<String>,
    pub email_verified: bool,
    pub full_name: Option<String>,
    /// Profile picture URL
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last successful login or link
    pub last_active: DateTime<Utc>,
}

impl User {
    pub fn for_identity(identity: &Identity, profile: &ProviderProfile, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id: identity.id,
            email: profile.email.clone(),
            email_verified: profile.email_verified.unwrap_or(false),
            full_name: profile.full_name(),
            image_url: profile.picture.clone(),
            created_at: now,
            last_active: now,
        }
    }

    pub fn sync_profile(&mut self, profile: &ProviderProfile, now: DateTime<Utc>) {
        if profile.email.is_some() {
            self.email = profile.email.clone();
            self.email_verified = profile.email_verified.unwrap_or(false);
        }
        self.full_name = profile.full_name();
        if profile.picture.is_some() {
            self.image_url = profile.picture.clone();
        }
        self.last_active = now;
    }
}
