use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientInfo, Implementation, RawContent,
    ReadResourceRequestParam, ResourceContents, Tool,
};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::{AgentError, AgentResult};

/// The MCP operations the agent relies on
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn list_tools(&self) -> AgentResult<Vec<Tool>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> AgentResult<CallToolResult>;

    async fn read_resource(&self, uri: &str) -> AgentResult<ResourceData>;
}

/// Payload of a resource: either text or base64 encoded bytes
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    Text(String),
    Blob(String),
}

/// Joined text of a tool result, with placeholders for non text content
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .map(|content| match &content.raw {
            RawContent::Text(text) => text.text.clone(),
            RawContent::Image(_) => "[Image]".to_string(),
            RawContent::Resource(_) => "[Resource]".to_string(),
            _ => "[Unsupported content]".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn mcp_error(e: impl std::fmt::Display) -> AgentError {
    AgentError::Mcp(e.to_string())
}

pub type ClientService = RunningService<RoleClient, ClientInfo>;

/// A running MCP client session
pub struct McpClient {
    peer: Peer<RoleClient>,
    service: Mutex<Option<ClientService>>,
}

impl McpClient {
    /// Identity announced during the initialize handshake
    pub fn client_info() -> ClientInfo {
        ClientInfo {
            client_info: Implementation {
                name: "parley".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Connect to a server over streamable HTTP and initialize a session
    pub async fn connect<S: Into<String>>(url: S) -> AgentResult<Self> {
        let url = url.into();
        let transport = StreamableHttpClientTransport::from_uri(url.as_str());
        let service = Self::client_info()
            .serve(transport)
            .await
            .map_err(mcp_error)?;

        let server = service
            .peer_info()
            .map(|info| info.server_info.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!(url = %url, server = %server, "Connected to MCP server");
        Ok(Self::from_service(service))
    }

    /// Wrap an already initialized session
    pub fn from_service(service: ClientService) -> Self {
        Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }
    }

    /// Terminate the session. Failures are only logged.
    pub async fn close(&self) {
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        match service.cancel().await {
            Ok(reason) => tracing::info!(?reason, "Closed MCP session"),
            Err(e) => tracing::warn!("Failed to close MCP session: {}", e),
        }
    }
}

#[async_trait]
impl McpSession for McpClient {
    async fn list_tools(&self) -> AgentResult<Vec<Tool>> {
        tracing::debug!("MCP tools/list");
        self.peer.list_all_tools().await.map_err(mcp_error)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> AgentResult<CallToolResult> {
        tracing::debug!(tool = name, "MCP tools/call");
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(AgentError::InvalidParameters(format!(
                    "Tool arguments must be an object, got {}",
                    other
                )))
            }
        };
        self.peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(mcp_error)
    }

    async fn read_resource(&self, uri: &str) -> AgentResult<ResourceData> {
        tracing::debug!(uri, "MCP resources/read");
        let result = self
            .peer
            .read_resource(ReadResourceRequestParam {
                uri: uri.to_string(),
            })
            .await
            .map_err(mcp_error)?;

        match result.contents.into_iter().next() {
            Some(ResourceContents::TextResourceContents { text, .. }) => Ok(ResourceData::Text(text)),
            Some(ResourceContents::BlobResourceContents { blob, .. }) => Ok(ResourceData::Blob(blob)),
            None => Err(AgentError::Mcp(format!("No content in resource: {}", uri))),
        }
    }
}
