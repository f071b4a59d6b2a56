//! Remote tool providers
//!
//! A [`Connection`] is the per-invocation handle to one provider: acquire
//! it, expose its discovered tools to a single [`crate::tools::ToolSet`],
//! and release it exactly once however the invocation ends.

mod http;

pub use http::{HttpConnector, HttpTransport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::tools::{Tool, ToolOutput};
use crate::Result;

/// Tool descriptor as announced by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Opens sessions against a provider URL
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Handshake with the provider. Failure leaves nothing open.
    async fn connect(&self, url: &str) -> Result<Arc<dyn ProviderTransport>>;
}

/// One open provider session
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteToolDescriptor>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput>;

    /// End the session
    async fn close(&self) -> Result<()>;
}

/// A discovered tool, proxied through the connection's transport
pub struct RemoteTool {
    descriptor: RemoteToolDescriptor,
    transport: Arc<dyn ProviderTransport>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        self.transport.call_tool(&self.descriptor.name, params).await
    }
}

/// Per-invocation provider connection.
///
/// Call [`Connection::release`] on the way out. A connection dropped
/// without it (panic, cancelled future) schedules the release on the
/// current runtime instead; either way the transport is closed once.
pub struct Connection {
    url: String,
    transport: Arc<dyn ProviderTransport>,
    tools: Vec<Arc<dyn Tool>>,
    released: AtomicBool,
}

impl Connection {
    /// Connect and discover tools. Any failure is reported as
    /// [`Error::Provider`] and closes whatever was opened.
    pub async fn acquire(connector: &dyn ProviderConnector, url: &str) -> Result<Self> {
        let transport = connector.connect(url).await.map_err(into_provider_error)?;

        let descriptors = match transport.list_tools().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    warn!("Failed to close provider {} after discovery error: {}", url, close_err);
                }
                return Err(into_provider_error(e));
            }
        };

        let tools: Vec<Arc<dyn Tool>> = descriptors
            .into_iter()
            .map(|descriptor| {
                Arc::new(RemoteTool {
                    descriptor,
                    transport: transport.clone(),
                }) as Arc<dyn Tool>
            })
            .collect();

        info!("Connected to tool provider {} ({} tools)", url, tools.len());
        Ok(Self {
            url: url.to_string(),
            transport,
            tools,
            released: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Tools discovered during acquisition
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// Close the session. Errors are logged and swallowed.
    pub async fn release(self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.transport.close().await {
            Ok(()) => debug!("Released tool provider {}", self.url),
            Err(e) => warn!("Failed to release tool provider {}: {}", self.url, e),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = self.transport.clone();
        let url = std::mem::take(&mut self.url);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Connection to {} dropped without release, releasing in background", url);
                handle.spawn(async move {
                    if let Err(e) = transport.close().await {
                        warn!("Failed to release tool provider {}: {}", url, e);
                    }
                });
            }
            Err(_) => warn!("Connection to {} dropped outside a runtime, session left open", url),
        }
    }
}

fn into_provider_error(e: Error) -> Error {
    match e {
        Error::Provider(_) => e,
        other => Error::Provider(other.to_string()),
    }
}
