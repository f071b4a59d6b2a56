//! Streamable-HTTP provider transport
//!
//! Built on the `rmcp` client. The handshake, paginated `tools/list`,
//! `tools/call` and session teardown all go through one running service
//! per connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientCapabilities, ClientInfo, ErrorCode, Implementation,
    LoggingLevel, LoggingMessageNotificationParam, ProtocolVersion, RawContent, ResourceContents,
};
use rmcp::service::{NotificationContext, Peer, RunningService, ServiceError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{ClientHandler, RoleClient};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ProviderConnector, ProviderTransport, RemoteToolDescriptor};
use crate::error::Error;
use crate::tools::ToolOutput;
use crate::Result;

#[derive(Clone)]
struct KestrelClientHandler {
    info: ClientInfo,
}

impl ClientHandler for KestrelClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let LoggingMessageNotificationParam { level, logger, data } = params;
        match level {
            LoggingLevel::Emergency
            | LoggingLevel::Alert
            | LoggingLevel::Critical
            | LoggingLevel::Error
            | LoggingLevel::Warning => {
                warn!("Provider log: level={:?} logger={:?} data={}", level, logger, data);
            }
            _ => debug!("Provider log: level={:?} logger={:?} data={}", level, logger, data),
        }
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        protocol_version: ProtocolVersion::LATEST,
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "kestrel".to_string(),
            title: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            icons: None,
            website_url: None,
        },
    }
}

/// Opens [`HttpTransport`] sessions
pub struct HttpConnector {
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl ProviderConnector for HttpConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ProviderTransport>> {
        url::Url::parse(url).map_err(|e| Error::Provider(format!("Invalid provider URL '{}': {}", url, e)))?;

        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let handler = KestrelClientHandler { info: client_info() };

        // A failed or timed-out handshake drops the transport along with
        // any session the server opened.
        let service = tokio::time::timeout(self.request_timeout, rmcp::serve_client(handler, transport))
            .await
            .map_err(|_| {
                Error::Provider(format!(
                    "Timed out handshaking with {} after {:?}",
                    url, self.request_timeout
                ))
            })?
            .map_err(|e| Error::Provider(format!("Handshake with {} failed: {}", url, e)))?;

        if let Some(info) = service.peer().peer_info() {
            debug!(
                "Initialized provider session with {} {}",
                info.server_info.name, info.server_info.version
            );
        }

        Ok(Arc::new(HttpTransport {
            service: Mutex::new(Some(service)),
            request_timeout: self.request_timeout,
        }))
    }
}

/// One provider session
pub struct HttpTransport {
    service: Mutex<Option<RunningService<RoleClient, KestrelClientHandler>>>,
    request_timeout: Duration,
}

impl HttpTransport {
    async fn peer(&self) -> Result<Peer<RoleClient>> {
        match &*self.service.lock().await {
            Some(service) => Ok(service.peer().clone()),
            None => Err(Error::Provider("provider session already released".to_string())),
        }
    }

    fn timed_out(&self, method: &str) -> Error {
        Error::Provider(format!("{} timed out after {:?}", method, self.request_timeout))
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn list_tools(&self) -> Result<Vec<RemoteToolDescriptor>> {
        let peer = self.peer().await?;
        let tools = tokio::time::timeout(self.request_timeout, peer.list_all_tools())
            .await
            .map_err(|_| self.timed_out("tools/list"))?
            .map_err(|e| Error::Provider(format!("tools/list failed: {}", e)))?;

        Ok(tools
            .into_iter()
            .map(|tool| RemoteToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(Error::Validation(format!(
                    "tool arguments must be a JSON object, got: {}",
                    other
                )))
            }
        };

        let peer = self.peer().await?;
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments,
        };
        let result = tokio::time::timeout(self.request_timeout, peer.call_tool(request))
            .await
            .map_err(|_| self.timed_out("tools/call"))?
            .map_err(call_error)?;
        call_result_to_output(result)
    }

    async fn close(&self) -> Result<()> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        let reason = service
            .cancel()
            .await
            .map_err(|e| Error::Provider(format!("session shutdown failed: {}", e)))?;
        debug!("Provider session closed: {:?}", reason);
        Ok(())
    }
}

/// An error reply means the provider answered: the call failed, the
/// provider did not. Only transport failures map to [`Error::Provider`].
fn call_error(err: ServiceError) -> Error {
    match err {
        ServiceError::McpError(data) if data.code == ErrorCode::INVALID_PARAMS => {
            Error::Validation(data.message.to_string())
        }
        ServiceError::McpError(data) => {
            Error::Tool(format!("remote tool failed ({}): {}", data.code.0, data.message))
        }
        other => Error::Provider(format!("tools/call failed: {}", other)),
    }
}

/// Map a `tools/call` result onto the three outcome shapes
fn call_result_to_output(result: CallToolResult) -> Result<ToolOutput> {
    let mut texts: Vec<String> = result.content.into_iter().map(|c| content_text(c.raw)).collect();

    if result.is_error.unwrap_or(false) {
        let reason = if texts.is_empty() {
            "remote tool reported an error".to_string()
        } else {
            texts.join("\n")
        };
        return Err(Error::Tool(reason));
    }

    if let Some(structured) = result.structured_content.filter(|v| !v.is_null()) {
        return Ok(ToolOutput::Structured(structured));
    }

    Ok(match texts.len() {
        0 => ToolOutput::Text(String::new()),
        1 => ToolOutput::Text(texts.remove(0)),
        _ => ToolOutput::List(texts.into_iter().map(Value::String).collect()),
    })
}

fn content_text(raw: RawContent) -> String {
    match raw {
        RawContent::Text(text) => text.text,
        RawContent::Image(image) => format!("[image] {}", image.mime_type),
        RawContent::Audio(audio) => format!("[audio] {}", audio.mime_type),
        RawContent::ResourceLink(link) => format!("[resource_link] {}", link.uri),
        RawContent::Resource(resource) => match resource.resource {
            ResourceContents::TextResourceContents { text, .. } => text,
            ResourceContents::BlobResourceContents { uri, .. } => format!("[resource] {}", uri),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::{Content, ErrorData};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_call_result_shapes() {
        let single = CallToolResult::success(vec![Content::text("42 results")]);
        assert_eq!(call_result_to_output(single).unwrap(), ToolOutput::Text("42 results".to_string()));

        let many = CallToolResult::success(vec![Content::text("a"), Content::text("b")]);
        assert_eq!(
            call_result_to_output(many).unwrap(),
            ToolOutput::List(vec![json!("a"), json!("b")])
        );

        let mut structured = CallToolResult::success(vec![]);
        structured.structured_content = Some(json!({"result": "ok"}));
        assert_eq!(call_result_to_output(structured).unwrap().normalize(), "ok");
    }

    #[test]
    fn test_call_result_error_flag() {
        let failed = CallToolResult::error(vec![Content::text("quota exceeded")]);
        let err = call_result_to_output(failed).unwrap_err();
        assert!(matches!(err, Error::Tool(ref m) if m == "quota exceeded"));
    }

    #[test]
    fn test_error_reply_is_a_tool_failure() {
        let bad_params = ServiceError::McpError(ErrorData::new(ErrorCode::INVALID_PARAMS, "Unknown tool: lookup", None));
        assert!(matches!(call_error(bad_params), Error::Validation(ref m) if m == "Unknown tool: lookup"));

        let internal = ServiceError::McpError(ErrorData::new(ErrorCode::INTERNAL_ERROR, "backend down", None));
        assert!(matches!(call_error(internal), Error::Tool(ref m) if m.contains("backend down")));

        assert!(matches!(call_error(ServiceError::TransportClosed), Error::Provider(_)));
    }

    async fn read_request(socket: &mut TcpStream) -> (String, Value) {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let text = String::from_utf8_lossy(&raw).to_string();
        let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_str(), ""));
        let request_line = head.lines().next().unwrap_or_default().to_string();
        (request_line, serde_json::from_str(body).unwrap_or(Value::Null))
    }

    /// JSON-RPC answer for one request; notifications get none.
    fn reply(message: &Value) -> Option<Value> {
        let id = message.get("id")?.clone();
        let outcome = match message["method"].as_str().unwrap_or_default() {
            "initialize" => json!({"result": {
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake", "version": "1.0"}
            }}),
            "tools/list" => json!({"result": {"tools": [
                {"name": "lookup", "description": "Look up", "inputSchema": {"type": "object"}}
            ]}}),
            "tools/call" if message["params"]["name"] == "lookup" => json!({"result": {
                "content": [{"type": "text", "text": "found"}]
            }}),
            "tools/call" => json!({"error": {"code": -32602, "message": "Unknown tool: missing"}}),
            _ => json!({"error": {"code": -32601, "message": "Method not found"}}),
        };
        let mut response = json!({"jsonrpc": "2.0", "id": id});
        if let (Some(target), Some(fields)) = (response.as_object_mut(), outcome.as_object()) {
            target.extend(fields.clone());
        }
        Some(response)
    }

    /// Minimal provider: JSON replies, no session id, one request per connection.
    async fn serve(listener: TcpListener) {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (request_line, message) = read_request(&mut socket).await;
            let response = match (request_line.starts_with("POST"), reply(&message)) {
                (true, Some(body)) => {
                    let body = body.to_string();
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    )
                }
                (true, None) => "HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
                _ => "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
            };
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());
        let server = tokio::spawn(serve(listener));

        let transport = HttpConnector::new(Duration::from_secs(10)).connect(&url).await.unwrap();
        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "lookup");
        assert_eq!(tools[0].input_schema["type"], "object");

        let out = transport.call_tool("lookup", json!({"q": "x"})).await.unwrap();
        assert_eq!(out, ToolOutput::Text("found".to_string()));

        // An error reply leaves the session usable.
        let err = transport.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m == "Unknown tool: missing"));
        let out = transport.call_tool("lookup", json!({})).await.unwrap();
        assert_eq!(out, ToolOutput::Text("found".to_string()));

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport.call_tool("lookup", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        server.abort();
    }

    #[tokio::test]
    async fn test_non_object_arguments_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());
        let server = tokio::spawn(serve(listener));

        let transport = HttpConnector::new(Duration::from_secs(10)).connect(&url).await.unwrap();
        let err = transport.call_tool("lookup", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        transport.close().await.unwrap();

        server.abort();
    }

    #[tokio::test]
    async fn test_connect_refused_is_provider_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = HttpConnector::new(Duration::from_secs(5))
            .connect(&format!("http://127.0.0.1:{}/mcp", port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_provider_error() {
        let err = HttpConnector::default().connect("not a url").await.err().unwrap();
        assert!(matches!(err, Error::Provider(ref m) if m.contains("Invalid provider URL")));
    }
}
