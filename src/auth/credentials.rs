//! Credential state and persistence
//!
//! A [`CredentialState`] is stored per identity. The file store writes
//! through a temp file and a rename so a reader never sees a torn entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tokens expiring within this window are treated as expired.
const EXPIRY_SKEW_MINUTES: i64 = 5;

/// Typed credential failures surfaced to the tool that needed the credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credentials for '{identity}' need interactive reauthentication")]
    NeedsReauthentication { identity: String },

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("reauthentication failed: {0}")]
    ReauthenticationFailed(String),

    #[error("credential store error: {0}")]
    Store(String),
}

/// Lifecycle position of a credential, used for logging transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Absent,
    Loaded,
    Valid,
    Expired,
    Refreshing,
    Invalid,
}

/// OAuth2 access credential for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialState {
    pub access_token: String,

    /// When the access token stops being accepted
    pub expiry: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Scopes granted
    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CredentialState {
    /// Build a state from a token endpoint answer.
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: i64,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token,
            expiry: Utc::now() + Duration::seconds(expires_in_secs),
            refresh_token,
            scopes,
            token_type: default_token_type(),
        }
    }

    /// True when the access token expires within the skew window of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::minutes(EXPIRY_SKEW_MINUTES) >= self.expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether every requested scope was granted. An empty grant list is
    /// treated as unknown and accepted.
    pub fn covers(&self, requested: &[String]) -> bool {
        self.scopes.is_empty() || requested.iter().all(|s| self.scopes.contains(s))
    }

    pub fn status(&self) -> CredentialStatus {
        if self.is_expired() {
            CredentialStatus::Expired
        } else {
            CredentialStatus::Valid
        }
    }
}

/// Persistent credential storage keyed by identity.
pub trait CredentialStore: Send + Sync {
    fn load(&self, identity: &str) -> Result<Option<CredentialState>, CredentialError>;

    /// Replace the entry. Must be complete before returning `Ok`.
    fn save(&self, identity: &str, state: &CredentialState) -> Result<(), CredentialError>;

    fn delete(&self, identity: &str) -> Result<(), CredentialError>;
}

/// One JSON file per identity under a directory
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for an identity; characters unsafe in file names become `_`
    pub fn path_for(&self, identity: &str) -> PathBuf {
        let name: String = identity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

fn store_err(context: &str, e: impl std::fmt::Display) -> CredentialError {
    CredentialError::Store(format!("{}: {}", context, e))
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, identity: &str) -> Result<Option<CredentialState>, CredentialError> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| store_err("failed to read credential file", e))?;

        // An unreadable entry is handled like a missing one so the caller
        // falls through to reauthentication.
        match serde_json::from_str(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!("Ignoring corrupt credential file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    fn save(&self, identity: &str, state: &CredentialState) -> Result<(), CredentialError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| store_err("failed to create credential directory", e))?;

        let path = self.path_for(identity);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| store_err("failed to serialize credentials", e))?;

        std::fs::write(&tmp, content).map_err(|e| store_err("failed to write credential file", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp, perms)
                .map_err(|e| store_err("failed to restrict credential file", e))?;
        }

        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            store_err("failed to replace credential file", e)
        })
    }

    fn delete(&self, identity: &str) -> Result<(), CredentialError> {
        let path = self.path_for(identity);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| store_err("failed to delete credential file", e))?;
        }
        Ok(())
    }
}

/// In-memory store with write accounting, for tests and embedding
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, CredentialState>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(identity: &str, state: CredentialState) -> Self {
        let store = Self::new();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(identity.to_string(), state);
        }
        store
    }

    pub fn get(&self, identity: &str) -> Option<CredentialState> {
        self.entries.lock().ok()?.get(identity).cloned()
    }

    /// Number of successful `save` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Make subsequent `save` calls fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, identity: &str) -> Result<Option<CredentialState>, CredentialError> {
        let entries = self.entries.lock().map_err(|e| store_err("lock poisoned", e))?;
        Ok(entries.get(identity).cloned())
    }

    fn save(&self, identity: &str, state: &CredentialState) -> Result<(), CredentialError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CredentialError::Store("write rejected".to_string()));
        }
        let mut entries = self.entries.lock().map_err(|e| store_err("lock poisoned", e))?;
        entries.insert(identity.to_string(), state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().map_err(|e| store_err("lock poisoned", e))?;
        entries.remove(identity);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(expires_in: i64) -> CredentialState {
        CredentialState::issued(
            "access".to_string(),
            Some("refresh".to_string()),
            expires_in,
            vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        )
    }

    #[test]
    fn test_not_expired() {
        assert!(!sample(3600).is_expired());
        assert_eq!(sample(3600).status(), CredentialStatus::Valid);
    }

    #[test]
    fn test_expired() {
        let mut state = sample(3600);
        state.expiry = Utc::now() - Duration::hours(1);
        assert!(state.is_expired());
        assert_eq!(state.status(), CredentialStatus::Expired);
    }

    #[test]
    fn test_expiring_soon_counts_as_expired() {
        assert!(sample(120).is_expired());
    }

    #[test]
    fn test_can_refresh() {
        let mut state = sample(3600);
        assert!(state.can_refresh());
        state.refresh_token = Some(String::new());
        assert!(!state.can_refresh());
        state.refresh_token = None;
        assert!(!state.can_refresh());
    }

    #[test]
    fn test_scope_coverage() {
        let state = sample(3600);
        assert!(state.covers(&["https://www.googleapis.com/auth/gmail.readonly".to_string()]));
        assert!(!state.covers(&["https://www.googleapis.com/auth/drive".to_string()]));

        let unknown = CredentialState { scopes: vec![], ..sample(3600) };
        assert!(unknown.covers(&["anything".to_string()]));
    }

    #[test]
    fn test_file_store_roundtrip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let state = sample(3600);

        store.save("google:default", &state).unwrap();
        let loaded = store.load("google:default").unwrap().unwrap();

        assert_eq!(loaded.access_token, state.access_token);
        assert_eq!(loaded.expiry, state.expiry);
        assert_eq!(loaded.refresh_token, state.refresh_token);
        assert_eq!(loaded.scopes, state.scopes);
        assert!(!store.path_for("google:default").with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens"));

        assert!(store.load("nobody").unwrap().is_none());
        store.delete("nobody").unwrap();

        store.save("someone", &sample(3600)).unwrap();
        store.delete("someone").unwrap();
        assert!(store.load("someone").unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupt_entry_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        std::fs::write(store.path_for("broken"), "{not json").unwrap();
        assert!(store.load("broken").unwrap().is_none());
    }

    #[test]
    fn test_path_sanitizes_identity() {
        let store = FileCredentialStore::new("/tmp/tokens");
        let path = store.path_for("google:me@example.com/../x");
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/tokens"));
        assert!(!path.file_name().unwrap().to_string_lossy().contains('/'));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save("id", &sample(3600)).unwrap();
        let mode = std::fs::metadata(store.path_for("id")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_store_counts_writes() {
        let store = MemoryCredentialStore::new();
        store.save("a", &sample(3600)).unwrap();
        store.save("a", &sample(3600)).unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.writes(), 2);
        assert_eq!(store.deletes(), 1);
        assert!(store.get("a").is_none());

        store.fail_writes(true);
        assert!(store.save("a", &sample(3600)).is_err());
        assert_eq!(store.writes(), 2);
    }
}
