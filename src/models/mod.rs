// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod identity;
pub mod profile;
pub mod user;

pub use identity::{AccountState, Identity, ProviderLink};
pub use profile::ProviderProfile;
pub use user::User;
