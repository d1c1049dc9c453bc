// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod broker;
pub mod keys;
pub mod link;
pub mod login;
pub mod redirect;
pub mod state;
pub mod tokens;

pub use broker::{OAuthBroker, ProviderToken};
pub use keys::{KeyStore, PublicKeyInfo};
pub use link::LinkOrchestrator;
pub use login::LoginOrchestrator;
pub use redirect::{RedirectPolicy, RedirectTarget};
pub use state::LoginState;
pub use tokens::{IssuedTokens, TokenLifetimes, TokenManager};
