//! Credential lifecycle manager
//!
//! Drives a persisted credential through load, validation, refresh and
//! reauthentication:
//!
//! ```text
//! Absent -> Loaded -> {Valid, Expired} -> Refreshing -> {Valid, Invalid} -> (reauthenticate) -> Valid
//! ```
//!
//! Calls for the same identity serialize on a per-identity lock, so
//! concurrent invocations never race two refreshes against the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::credentials::{CredentialError, CredentialState, CredentialStatus, CredentialStore};

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, state: &CredentialState) -> Result<CredentialState, CredentialError>;
}

/// Out-of-process consent (browser flow). Returns a typed outcome instead
/// of blocking the caller indefinitely.
#[async_trait]
pub trait Reauthenticator: Send + Sync {
    async fn reauthenticate(
        &self,
        identity: &str,
        scopes: &[String],
    ) -> Result<CredentialState, CredentialError>;
}

/// Obtains and maintains a valid credential per identity.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    reauthenticator: Option<Arc<dyn Reauthenticator>>,
    scopes: Vec<String>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialManager {
    /// Create a manager without interactive reauthentication; an unusable
    /// credential yields [`CredentialError::NeedsReauthentication`].
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            reauthenticator: None,
            scopes: Vec::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reauthenticator(mut self, reauthenticator: Arc<dyn Reauthenticator>) -> Self {
        self.reauthenticator = Some(reauthenticator);
        self
    }

    /// Scopes the credential must cover
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    fn identity_lock(&self, identity: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Return a valid credential for `identity`, refreshing or
    /// reauthenticating as needed.
    ///
    /// Pure validation performs no store write. A successful refresh or
    /// reauthentication performs exactly one write, completed before the
    /// credential is returned.
    pub async fn ensure_valid(&self, identity: &str) -> Result<CredentialState, CredentialError> {
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().await;

        // Loaded under the lock: a concurrent caller may have refreshed already.
        let Some(state) = self.store.load(identity)? else {
            debug!(identity, status = ?CredentialStatus::Absent, "No stored credential");
            return self.reauthenticate_locked(identity).await;
        };
        debug!(identity, status = ?CredentialStatus::Loaded, "Loaded stored credential");

        if !state.covers(&self.scopes) {
            warn!(identity, "Stored credential lacks requested scopes");
            self.invalidate(identity);
            return self.reauthenticate_locked(identity).await;
        }

        if !state.is_expired() {
            debug!(identity, status = ?CredentialStatus::Valid, "Using cached access token");
            return Ok(state);
        }

        if state.can_refresh() {
            info!(identity, status = ?CredentialStatus::Refreshing, "Access token expired, refreshing");
            match self.refresher.refresh(&state).await {
                Ok(refreshed) => {
                    self.persist(identity, &refreshed)?;
                    info!(identity, status = ?CredentialStatus::Valid, "Token refreshed");
                    return Ok(refreshed);
                }
                Err(e) => {
                    warn!(identity, "Token refresh failed: {}", e);
                }
            }
        } else {
            debug!(identity, status = ?CredentialStatus::Expired, "Expired with no refresh token");
        }

        self.invalidate(identity);
        self.reauthenticate_locked(identity).await
    }

    /// Run interactive reauthentication unconditionally (the `login` command).
    pub async fn login(&self, identity: &str) -> Result<CredentialState, CredentialError> {
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().await;
        self.reauthenticate_locked(identity).await
    }

    /// Remove the stored credential
    pub async fn logout(&self, identity: &str) -> Result<(), CredentialError> {
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().await;
        self.store.delete(identity)
    }

    /// True when a stored credential is valid or can be refreshed, without
    /// touching the network
    pub fn has_usable_credentials(&self, identity: &str) -> Result<bool, CredentialError> {
        Ok(self
            .store
            .load(identity)?
            .is_some_and(|s| s.covers(&self.scopes) && (!s.is_expired() || s.can_refresh())))
    }

    async fn reauthenticate_locked(&self, identity: &str) -> Result<CredentialState, CredentialError> {
        let Some(reauthenticator) = &self.reauthenticator else {
            info!(identity, "Credential needs interactive reauthentication");
            return Err(CredentialError::NeedsReauthentication {
                identity: identity.to_string(),
            });
        };

        info!(identity, "Starting reauthentication");
        let state = reauthenticator
            .reauthenticate(identity, &self.scopes)
            .await
            .map_err(|e| match e {
                CredentialError::ReauthenticationFailed(_) => e,
                other => CredentialError::ReauthenticationFailed(other.to_string()),
            })?;

        self.persist(identity, &state)?;
        info!(identity, status = ?CredentialStatus::Valid, "Reauthentication succeeded");
        Ok(state)
    }

    /// Write a fresh credential. If the write fails the entry is dropped, so
    /// the next run starts from `Absent` instead of reusing a consumed token.
    fn persist(&self, identity: &str, state: &CredentialState) -> Result<(), CredentialError> {
        if let Err(e) = self.store.save(identity, state) {
            warn!(identity, "Failed to persist credential: {}", e);
            self.invalidate(identity);
            return Err(e);
        }
        Ok(())
    }

    fn invalidate(&self, identity: &str) {
        debug!(identity, status = ?CredentialStatus::Invalid, "Deleting stored credential");
        if let Err(e) = self.store.delete(identity) {
            warn!(identity, "Failed to delete stored credential: {}", e);
        }
    }
}
