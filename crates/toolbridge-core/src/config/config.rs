use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mcp::catalog::{MAX_TOOL_NAME_LEN, QUALIFIER};

/// One MCP endpoint the client connects to at startup.
///
/// `name` and `version` are announced as `clientInfo` during the handshake,
/// `capabilities` is sent verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default = "default_endpoint_version")]
    pub version: String,
    #[serde(default = "default_capabilities")]
    pub capabilities: Value,
    pub url: String,
}

fn default_endpoint_version() -> String {
    "1.0.0".to_string()
}

fn default_capabilities() -> Value {
    json!({})
}

fn default_servers() -> Vec<EndpointConfig> {
    vec![EndpointConfig {
        name: "test-client".to_string(),
        version: default_endpoint_version(),
        capabilities: default_capabilities(),
        url: "http://localhost:3000/sse".to_string(),
    }]
}

/// Example `~/.toolbridge/config.json` or `.toolbridge.json`:
/// ```json
/// {
///   "model": "claude-3-5-sonnet-20241022",
///   "servers": [
///     { "name": "notes", "url": "http://localhost:3000/sse" },
///     { "name": "search", "version": "2.1.0", "url": "http://localhost:4000/sse" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Conversation retention window, preamble excluded.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// Upper bound on tool calls running at the same time.
    #[serde(default = "default_max_inflight_tools")]
    pub max_inflight_tools: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight tool calls before aborting them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_servers")]
    pub servers: Vec<EndpointConfig>,
}

fn default_model() -> String {
    std::env::var("TOOLBRIDGE_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string())
}

fn default_base_url() -> String {
    std::env::var("TOOLBRIDGE_BASE_URL")
        .unwrap_or_else(|_| "https://api.anthropic.com".to_string())
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_history_messages() -> usize {
    100
}

fn default_max_inflight_tools() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            max_tokens: default_max_tokens(),
            max_history_messages: default_max_history_messages(),
            max_inflight_tools: default_max_inflight_tools(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            servers: default_servers(),
        }
    }
}

impl BridgeConfig {
    /// Home config, then the working directory's `.toolbridge.json` on top,
    /// then `ANTHROPIC_API_KEY` if no key was configured.
    pub fn load() -> Result<Self> {
        let local = std::env::current_dir()
            .ok()
            .map(|d| d.join(".toolbridge.json"));
        Self::load_from(&Self::resolve_path("config.json"), local.as_deref())
    }

    pub fn load_from(config_path: &Path, local_path: Option<&Path>) -> Result<Self> {
        let mut config = if config_path.exists() {
            let data = std::fs::read_to_string(config_path)?;
            serde_json::from_str::<BridgeConfig>(&data)?
        } else {
            BridgeConfig::default()
        };

        if let Some(local) = local_path.filter(|p| p.exists()) {
            let data = std::fs::read_to_string(local)?;
            let override_val: Value = serde_json::from_str(&data)?;
            let mut base = serde_json::to_value(&config)?;
            if let (Some(base_obj), Some(over_obj)) =
                (base.as_object_mut(), override_val.as_object())
            {
                for (k, v) in over_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            config = serde_json::from_value(base)?;
        }

        if config.api_key.is_empty() {
            config.api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            bail!("no API key configured: set ANTHROPIC_API_KEY or add \"api_key\" to the config");
        }
        if self.servers.is_empty() {
            bail!("no MCP servers configured");
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                bail!("duplicate MCP server name '{}'", server.name);
            }
            // the name prefixes every tool name offered to the model
            if server.name.is_empty()
                || !server
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                bail!(
                    "MCP server name '{}' may only contain ASCII letters, digits and '-'",
                    server.name
                );
            }
            if server.name.len() + QUALIFIER.len() >= MAX_TOOL_NAME_LEN {
                bail!(
                    "MCP server name '{}' is too long to prefix tool names",
                    server.name
                );
            }
        }
        if self.max_inflight_tools == 0 {
            bail!("max_inflight_tools must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn resolve_path(relative: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".toolbridge")
            .join(relative)
    }
}
