// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process identity store.
//!
//! The `(provider, subject)` index is a [`DashMap`]; holding its entry guard
//! while the identity record is written makes create-or-update and link
//! atomic per external account. Lock order is always index, then records.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::db::{IdentityStore, StoreError};
use crate::models::{AccountState, Identity, ProviderLink, ProviderProfile, User};

#[derive(Clone)]
struct Record {
    identity: Identity,
    user: User,
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    /// (provider, subject) -> identity id
    links: DashMap<(String, String), Uuid>,
    records: DashMap<Uuid, Record>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities (test helper).
    pub fn identity_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn create_or_update(
        &self,
        provider: &str,
        subject: &str,
        profile: &ProviderProfile,
    ) -> Result<(Identity, User), StoreError> {
        let now = Utc::now();

        match self.links.entry((provider.to_string(), subject.to_string())) {
            Entry::Occupied(entry) => {
                let id = *entry.get();
                let mut record = self
                    .records
                    .get_mut(&id)
                    .ok_or(StoreError::NotFound(id))?;
                record.identity.sync_profile(profile, now);
                record.user.sync_profile(profile, now);

                tracing::debug!(identity_id = %id, provider, "Identity updated from profile");
                Ok((record.identity.clone(), record.user.clone()))
            }
            Entry::Vacant(entry) => {
                let identity = Identity::from_profile(provider, subject, profile, now);
                let user = User::for_identity(&identity, profile, now);
                let id = identity.id;

                self.records.insert(
                    id,
                    Record {
                        identity: identity.clone(),
                        user: user.clone(),
                    },
                );
                entry.insert(id);

                tracing::info!(identity_id = %id, provider, "Identity created");
                Ok((identity, user))
            }
        }
    }

    async fn link(
        &self,
        identity_id: Uuid,
        provider: &str,
        subject: &str,
        profile: &ProviderProfile,
    ) -> Result<Identity, StoreError> {
        let now = Utc::now();

        match self.links.entry((provider.to_string(), subject.to_string())) {
            Entry::Occupied(entry) if *entry.get() != identity_id => Err(StoreError::Conflict {
                provider: provider.to_string(),
                subject: subject.to_string(),
            }),
            Entry::Occupied(_) => {
                let mut record = self
                    .records
                    .get_mut(&identity_id)
                    .ok_or(StoreError::NotFound(identity_id))?;
                record.user.last_active = now;
                Ok(record.identity.clone())
            }
            Entry::Vacant(entry) => {
                let mut record = self
                    .records
                    .get_mut(&identity_id)
                    .ok_or(StoreError::NotFound(identity_id))?;

                record.identity.links.push(ProviderLink {
                    provider: provider.to_string(),
                    subject: subject.to_string(),
                    linked_at: now,
                });
                record.identity.updated_at = now;
                if record.user.email.is_none() {
                    record.user.email = profile.email.clone();
                }
                record.user.last_active = now;
                entry.insert(identity_id);

                tracing::info!(identity_id = %identity_id, provider, "Account linked");
                Ok(record.identity.clone())
            }
        }
    }

    async fn identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.identity.clone()))
    }

    async fn user(&self, identity_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.records.get(&identity_id).map(|r| r.user.clone()))
    }

    async fn set_state(&self, id: Uuid, state: AccountState) -> Result<Identity, StoreError> {
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.identity.state = state;
        record.identity.updated_at = Utc::now();
        Ok(record.identity.clone())
    }
}
