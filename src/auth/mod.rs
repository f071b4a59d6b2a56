//! Credential lifecycle for remote API families
//!
//! This module provides:
//! - Credential state and its persistent stores
//! - [`CredentialManager`] for load / validate / refresh / reauthenticate
//! - Google OAuth2 refresh and browser consent collaborators
//! - One-shot OAuth2 redirect listener

mod callback_server;
mod credentials;
mod manager;
mod oauth;

pub use credentials::{
    CredentialError, CredentialState, CredentialStatus, CredentialStore, FileCredentialStore,
    MemoryCredentialStore,
};
pub use manager::{CredentialManager, Reauthenticator, TokenRefresher};
pub use oauth::{BrowserReauthenticator, ClientSecrets, GoogleTokenRefresher, PkcePair, DEFAULT_CALLBACK_TIMEOUT_SECS};

#[cfg(test)]
pub(crate) use manager::testing;
