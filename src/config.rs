//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default model; the backend is chosen from the model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Gemini API key (used for `gemini*` models)
    #[serde(default)]
    pub gemini_api_key: String,

    /// OpenAI API key (used for `gpt*`, `o1*`, `o3*` models)
    #[serde(default)]
    pub openai_api_key: String,

    /// Gemini model behind the `google_search` tool
    #[serde(default = "default_search_model")]
    pub search_model: String,

    /// Default iteration budget when a request does not set one
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// How many unparseable backend turns are tolerated per invocation
    #[serde(default = "default_parse_retry_limit")]
    pub parse_retry_limit: usize,

    /// Remote tool provider attached to every invocation
    #[serde(default)]
    pub tool_provider: Option<ToolProviderConfig>,

    /// Google API access (Gmail tools)
    #[serde(default)]
    pub google: GoogleConfig,
}

/// Remote tool provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProviderConfig {
    pub url: String,
}

/// Google OAuth and Gmail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client secrets file downloaded from the Google console
    #[serde(default)]
    pub client_secrets_path: Option<PathBuf>,

    /// Directory holding persisted credential state, one file per identity
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,

    /// Identity key used for the persisted credential
    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Fixed recipient for `send_email_to_fixed_address`
    #[serde(default)]
    pub mail_to: String,

    /// Local port for the OAuth redirect listener
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,

    /// Seconds `login` waits for the browser redirect
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_secrets_path: None,
            token_dir: default_token_dir(),
            identity: default_identity(),
            scopes: default_scopes(),
            mail_to: String::new(),
            callback_port: default_callback_port(),
            callback_timeout_secs: default_callback_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gemini-1.5-pro".to_string()
}

fn default_search_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_iterations() -> usize {
    5
}

fn default_parse_retry_limit() -> usize {
    2
}

fn default_token_dir() -> PathBuf {
    config_dir().join("tokens")
}

fn default_identity() -> String {
    "google:default".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/gmail.readonly".to_string(),
        "https://www.googleapis.com/auth/gmail.send".to_string(),
    ]
}

fn default_callback_port() -> u16 {
    8085
}

fn default_callback_timeout_secs() -> u64 {
    crate::auth::DEFAULT_CALLBACK_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            search_model: default_search_model(),
            max_iterations: default_max_iterations(),
            parse_retry_limit: default_parse_retry_limit(),
            tool_provider: None,
            google: GoogleConfig::default(),
        }
    }
}

impl Config {
    /// Apply overrides from a variable lookup (the process environment in practice).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("GEMINI_API_KEY") {
            self.gemini_api_key = key;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai_api_key = key;
        }
        if let Some(model) = get("KESTREL_MODEL") {
            self.model = model;
        }
        if let Some(url) = get("KESTREL_TOOL_PROVIDER_URL") {
            self.tool_provider = Some(ToolProviderConfig { url });
        }
        if let Some(dir) = get("GOOGLE_APIS_TOKEN_PATH") {
            self.google.token_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("GOOGLE_APIS_CREDENTIALS_PATH") {
            self.google.client_secrets_path = Some(PathBuf::from(path));
        }
        if let Some(to) = get("MAIL_TO") {
            self.google.mail_to = to;
        }
    }

    /// Reject settings the agent loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be at least 1".to_string()));
        }
        if let Some(provider) = &self.tool_provider {
            url::Url::parse(&provider.url)
                .map_err(|e| Error::Config(format!("Invalid tool provider url {}: {}", provider.url, e)))?;
        }
        Ok(())
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kestrel")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from file, then apply environment overrides
pub fn load() -> Result<Config> {
    let path = config_path();

    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'kestrel onboard' first.",
            path
        )));
    }

    let mut config = load_from(&path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Like [`load`], but falls back to defaults plus environment when no file exists
pub fn load_or_default() -> Result<Config> {
    let path = config_path();
    let mut config = if path.exists() {
        load_from(&path)?
    } else {
        tracing::debug!("No config file at {:?}, using defaults", path);
        Config::default()
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Read a config file without applying overrides
pub fn load_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Write a default configuration and create the token directory
pub fn onboard() -> Result<Config> {
    let path = config_path();
    let config = if path.exists() {
        load_from(&path)?
    } else {
        Config::default()
    };

    std::fs::create_dir_all(&config.google.token_dir)?;
    save(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.parse_retry_limit, 2);
        assert!(config.tool_provider.is_none());
        assert_eq!(config.google.scopes.len(), 2);
        assert!(config.google.scopes.iter().all(|s| s.contains("/auth/gmail.")));
        assert_eq!(config.google.callback_timeout_secs, 300);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"model": "gpt-4o-mini"}"#).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.google.identity, "google:default");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("KESTREL_TOOL_PROVIDER_URL", "http://127.0.0.1:8002/mcp"),
            ("MAIL_TO", "me@example.com"),
            ("GEMINI_API_KEY", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.gemini_api_key = "kept".to_string();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.openai_api_key, "sk-test");
        assert_eq!(config.gemini_api_key, "kept");
        assert_eq!(config.google.mail_to, "me@example.com");
        assert_eq!(
            config.tool_provider.as_ref().map(|p| p.url.as_str()),
            Some("http://127.0.0.1:8002/mcp")
        );
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut config = Config::default();
        config.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.model = "gpt-4o".to_string();
        config.tool_provider = Some(ToolProviderConfig { url: "http://localhost:9000".to_string() });
        save_to(&config, &path).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.model, "gpt-4o");
        assert_eq!(loaded.tool_provider.unwrap().url, "http://localhost:9000");
    }
}
