//! Google OAuth2 collaborators for the credential manager
//!
//! - [`GoogleTokenRefresher`]: refresh_token grant against the token endpoint
//! - [`BrowserReauthenticator`]: PKCE authorization code flow with a local
//!   redirect listener

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::callback_server::{redirect_uri, wait_for_callback};
use super::credentials::{CredentialError, CredentialState};
use super::manager::{Reauthenticator, TokenRefresher};
use crate::error::Error;
use crate::Result;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// How long the consent flow waits for the browser redirect
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// OAuth client registration, as downloaded from the Google console
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

/// The console wraps the registration in `installed` or `web`.
#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn parse(json: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| Error::Config("Client secrets file has no 'installed' or 'web' section".to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read client secrets {:?}: {}", path, e)))?;
        Self::parse(&content)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Missing refresh token or scope fall back to what was held before.
    fn into_state(self, previous_refresh: Option<&str>, previous_scopes: &[String]) -> CredentialState {
        let scopes = match self.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => previous_scopes.to_vec(),
        };
        CredentialState::issued(
            self.access_token,
            self.refresh_token.or_else(|| previous_refresh.map(str::to_string)),
            self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            scopes,
        )
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'a str,
}

#[derive(Serialize)]
struct CodeExchangeRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    code_verifier: &'a str,
    redirect_uri: &'a str,
    grant_type: &'a str,
}

/// POST a form to the token endpoint and decode the answer.
async fn post_token_form<T: Serialize + ?Sized>(
    http: &Client,
    token_uri: &str,
    form: &T,
) -> std::result::Result<TokenResponse, String> {
    let response = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("{}: {}", status, body));
    }

    response.json().await.map_err(|e| e.to_string())
}

/// Refreshes access tokens with the refresh_token grant
#[derive(Clone)]
pub struct GoogleTokenRefresher {
    secrets: ClientSecrets,
    http: Client,
}

impl GoogleTokenRefresher {
    pub fn new(secrets: ClientSecrets) -> Self {
        Self { secrets, http: Client::new() }
    }
}

#[async_trait]
impl TokenRefresher for GoogleTokenRefresher {
    async fn refresh(&self, state: &CredentialState) -> std::result::Result<CredentialState, CredentialError> {
        let refresh_token = state
            .refresh_token
            .as_deref()
            .ok_or_else(|| CredentialError::RefreshFailed("no refresh token".to_string()))?;

        let request = RefreshRequest {
            client_id: &self.secrets.client_id,
            client_secret: &self.secrets.client_secret,
            refresh_token,
            grant_type: "refresh_token",
        };

        let token = post_token_form(&self.http, &self.secrets.token_uri, &request)
            .await
            .map_err(CredentialError::RefreshFailed)?;
        Ok(token.into_state(Some(refresh_token), &state.scopes))
    }
}

/// PKCE verifier and S256 challenge (RFC 7636)
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        // 32 random bytes encode to a 43 character verifier.
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }
}

/// Random CSRF state for the authorization request
fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn reauth_failed(e: Error) -> CredentialError {
    CredentialError::ReauthenticationFailed(e.to_string())
}

/// Browser-based consent with a one-shot local redirect listener
#[derive(Clone)]
pub struct BrowserReauthenticator {
    secrets: ClientSecrets,
    http: Client,
    callback_port: u16,
    callback_timeout: Duration,
}

impl BrowserReauthenticator {
    pub fn new(secrets: ClientSecrets, callback_port: u16) -> Self {
        Self {
            secrets,
            http: Client::new(),
            callback_port,
            callback_timeout: Duration::from_secs(DEFAULT_CALLBACK_TIMEOUT_SECS),
        }
    }

    /// How long to wait for the browser redirect before giving up
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    fn authorization_url(&self, challenge: &str, state: &str, scopes: &[String]) -> Result<String> {
        let mut url = Url::parse(&self.secrets.auth_uri)
            .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.secrets.client_id)
            .append_pair("redirect_uri", &redirect_uri(self.callback_port))
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        Ok(url.to_string())
    }
}

#[async_trait]
impl Reauthenticator for BrowserReauthenticator {
    async fn reauthenticate(
        &self,
        identity: &str,
        scopes: &[String],
    ) -> std::result::Result<CredentialState, CredentialError> {
        let pkce = PkcePair::generate();
        let state = generate_state();
        let auth_url = self
            .authorization_url(&pkce.challenge, &state, scopes)
            .map_err(reauth_failed)?;

        println!("\nAuthorize access for {}:\n{}\n", identity, auth_url);
        if let Err(e) = open::that(&auth_url) {
            tracing::warn!("Failed to open browser: {}", e);
        }

        let code = wait_for_callback(self.callback_port, &state, self.callback_timeout)
            .await
            .map_err(reauth_failed)?;

        let redirect = redirect_uri(self.callback_port);
        let request = CodeExchangeRequest {
            client_id: &self.secrets.client_id,
            client_secret: &self.secrets.client_secret,
            code: &code,
            code_verifier: &pkce.verifier,
            redirect_uri: &redirect,
            grant_type: "authorization_code",
        };

        let token = post_token_form(&self.http, &self.secrets.token_uri, &request)
            .await
            .map_err(CredentialError::ReauthenticationFailed)?;
        Ok(token.into_state(None, scopes))
    }
}
