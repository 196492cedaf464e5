use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::config::EndpointConfig;

use super::error::McpError;
use super::transport::SseTransport;

const PROTOCOL_VERSION: &str = "2024-11-05";

// ── MCP capability types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPromptInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<McpPromptArgument>,
}

/// Flattened `tools/call` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn from_result(result: &Value) -> Self {
        let is_error = result["isError"].as_bool().unwrap_or(false);
        let content = result["content"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| {
                        if c["type"] == "text" {
                            c["text"].as_str().map(str::to_string)
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Self { content, is_error }
    }
}

// ── McpSession ───────────────────────────────────────────────────────────────

/// A live, initialized connection to one endpoint.
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>>;
    async fn list_resources(&self) -> Result<Vec<McpResourceInfo>>;
    async fn list_prompts(&self) -> Result<Vec<McpPromptInfo>>;
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolOutput>;
}

// ── McpClient ────────────────────────────────────────────────────────────────

pub struct McpClient {
    pub server_name: String,
    transport: SseTransport,
}

impl McpClient {
    /// Open the SSE session for `endpoint` and run the initialize handshake.
    pub async fn connect(endpoint: &EndpointConfig, timeout: Duration) -> Result<Self> {
        let transport = SseTransport::connect(&endpoint.url, timeout).await?;
        let client = Self {
            server_name: endpoint.name.clone(),
            transport,
        };
        client.initialize(endpoint).await?;
        Ok(client)
    }

    async fn initialize(&self, endpoint: &EndpointConfig) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": endpoint.capabilities,
            "clientInfo": {
                "name": endpoint.name,
                "version": endpoint.version
            }
        });

        let result = self.transport.request("initialize", Some(params)).await?;
        info!(
            "MCP connected: {} → {} (protocol {}), posting to {}",
            self.server_name,
            result["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            result["protocolVersion"].as_str().unwrap_or("?"),
            self.transport.message_url()
        );

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, method: &str, key: &str) -> Result<Vec<T>> {
        let result = self.transport.request(method, None).await?;
        let items = match result.get(key) {
            Some(Value::Array(items)) => items,
            // Servers without the capability may answer with an empty object.
            None | Some(Value::Null) => return Ok(vec![]),
            Some(_) => {
                return Err(McpError::Protocol {
                    method: method.to_string(),
                    reason: format!("expected '{key}' array"),
                }
                .into())
            }
        };
        items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl McpSession for McpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        self.list("tools/list", "tools").await
    }

    async fn list_resources(&self) -> Result<Vec<McpResourceInfo>> {
        self.list("resources/list", "resources").await
    }

    async fn list_prompts(&self) -> Result<Vec<McpPromptInfo>> {
        self.list("prompts/list", "prompts").await
    }

    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolOutput> {
        let params = json!({
            "name": tool_name,
            "arguments": arguments
        });
        let result = self.transport.request("tools/call", Some(params)).await?;
        Ok(ToolOutput::from_result(&result))
    }
}
