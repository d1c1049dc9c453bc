//! Identity storage.
//!
//! Persistence is behind the [`IdentityStore`] trait; the service only needs
//! atomic create-or-update keyed by `(provider, subject)` plus lookups.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AccountState, Identity, ProviderProfile, User};

pub use memory::MemoryIdentityStore;

/// Identity store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// `(provider, subject)` already belongs to a different identity.
    #[error("{provider}/{subject} is linked to another identity")]
    Conflict { provider: String, subject: String },

    #[error("identity not found: {0}")]
    NotFound(Uuid),

    #[error("identity store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find the identity linked to `(provider, subject)` and refresh its
    /// profile, or create identity and user if there is none.
    ///
    /// Must be atomic with respect to other calls for the same pair.
    async fn create_or_update(
        &self,
        provider: &str,
        subject: &str,
        profile: &ProviderProfile,
    ) -> Result<(Identity, User), StoreError>;

    /// Attach `(provider, subject)` to an existing identity.
    ///
    /// Re-linking the same pair to the same identity succeeds; linking a pair
    /// owned by another identity fails with [`StoreError::Conflict`].
    async fn link(
        &self,
        identity_id: Uuid,
        provider: &str,
        subject: &str,
        profile: &ProviderProfile,
    ) -> Result<Identity, StoreError>;

    async fn identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    async fn user(&self, identity_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn set_state(&self, id: Uuid, state: AccountState) -> Result<Identity, StoreError>;
}
