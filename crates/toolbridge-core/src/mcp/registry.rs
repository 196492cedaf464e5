use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::EndpointConfig;

use super::client::{McpClient, McpSession};

/// Live endpoints keyed by name.
///
/// Configuration stays immutable; the connection handle is held next to it
/// rather than written into it.
#[derive(Default)]
pub struct EndpointRegistry {
    order: Vec<String>,
    endpoints: HashMap<String, (EndpointConfig, Arc<dyn McpSession>)>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to every endpoint in order. The first failure aborts startup.
    pub async fn connect_all(configs: &[EndpointConfig], timeout: Duration) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let client = McpClient::connect(config, timeout)
                .await
                .with_context(|| {
                    format!("connecting to MCP server '{}' at {}", config.name, config.url)
                })?;
            registry.insert(config.clone(), Arc::new(client));
        }
        Ok(registry)
    }

    /// Register a live session. Replaces any endpoint with the same name.
    pub fn insert(&mut self, config: EndpointConfig, session: Arc<dyn McpSession>) {
        let name = config.name.clone();
        if self
            .endpoints
            .insert(name.clone(), (config, session))
            .is_none()
        {
            self.order.push(name);
        }
    }

    pub fn session(&self, name: &str) -> Option<Arc<dyn McpSession>> {
        self.endpoints.get(name).map(|(_, s)| Arc::clone(s))
    }

    pub fn config(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(name).map(|(c, _)| c)
    }

    /// Endpoints in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&EndpointConfig, &Arc<dyn McpSession>)> {
        self.order
            .iter()
            .filter_map(|name| self.endpoints.get(name))
            .map(|(c, s)| (c, s))
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
