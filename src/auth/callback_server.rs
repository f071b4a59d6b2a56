//! One-shot OAuth2 redirect listener
//!
//! Accepts a single browser redirect on 127.0.0.1, answers it with a short
//! HTML page and hands back the authorization code.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use crate::error::Error;
use crate::Result;

const SUCCESS_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>Kestrel</title></head>\
<body><h1>Authorization complete</h1><p>You can close this window and return to the terminal.</p></body></html>";

const FAILURE_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>Kestrel</title></head>\
<body><h1>Authorization failed</h1><p>Check the terminal for details.</p></body></html>";

/// Redirect URI registered with the authorization request
pub fn redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{}/callback", port)
}

/// Wait for one redirect and return its authorization code.
///
/// Gives up with "timed out" when no redirect has been read within
/// `timeout`.
pub async fn wait_for_callback(port: u16, expected_state: &str, timeout: Duration) -> Result<String> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Other(format!("Failed to start callback listener on {}: {}", addr, e)))?;
    tracing::info!("Waiting for OAuth redirect on http://{} (up to {:?})", addr, timeout);

    let accepted = tokio::time::timeout(timeout, async {
        let (mut socket, _) = listener.accept().await?;
        let mut buffer = vec![0u8; 8192];
        let n = socket.read(&mut buffer).await?;
        Ok::<_, std::io::Error>((socket, String::from_utf8_lossy(&buffer[..n]).into_owned()))
    })
    .await;
    let (mut socket, request) = match accepted {
        Ok(read) => read?,
        Err(_) => {
            tracing::warn!("No OAuth redirect within {:?}", timeout);
            return Err(Error::Other("timed out".to_string()));
        }
    };

    let outcome = authorization_code(&request, expected_state);
    let (status, body) = if outcome.is_ok() {
        ("200 OK", SUCCESS_HTML)
    } else {
        ("400 Bad Request", FAILURE_HTML)
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;

    outcome
}

/// Extract the code from a raw `GET /callback?...` request, checking state.
fn authorization_code(request: &str, expected_state: &str) -> Result<String> {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| Error::Other("Malformed callback request".to_string()))?;

    let url = Url::parse(&format!("http://localhost{}", target))
        .map_err(|e| Error::Other(format!("Malformed callback URL: {}", e)))?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(err) = params.get("error") {
        let description = params.get("error_description").map(String::as_str).unwrap_or("no description");
        return Err(Error::Other(format!("Authorization denied: {} ({})", err, description)));
    }

    match params.get("state") {
        Some(state) if state == expected_state => {}
        Some(_) => return Err(Error::Other("OAuth state mismatch".to_string())),
        None => return Err(Error::Other("OAuth callback without state".to_string())),
    }

    params
        .get("code")
        .cloned()
        .ok_or_else(|| Error::Other("OAuth callback without code".to_string()))
}
