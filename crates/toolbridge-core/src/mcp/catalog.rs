use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::tools::tool::ToolDef;

use super::client::{McpPromptInfo, McpResourceInfo};
use super::registry::EndpointRegistry;

/// Separator between endpoint and tool in the name offered to the model.
pub const QUALIFIER: &str = "__";

/// Longest tool name the Messages API accepts.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Whether the completion API accepts `name` as a tool name
/// (`^[a-zA-Z0-9_-]{1,64}$`).
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn qualified_name(endpoint: &str, tool: &str) -> String {
    format!("{endpoint}{QUALIFIER}{tool}")
}

/// Split a qualified name into `(endpoint, tool)`.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(QUALIFIER)
        .filter(|(endpoint, tool)| !endpoint.is_empty() && !tool.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Name of the endpoint that advertised the tool.
    pub endpoint: String,
}

impl CatalogTool {
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.endpoint, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogResource {
    #[serde(flatten)]
    pub info: McpResourceInfo,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogPrompt {
    #[serde(flatten)]
    pub info: McpPromptInfo,
    pub endpoint: String,
}

/// Everything every endpoint advertised, flattened and tagged by endpoint.
///
/// Tools with the same name on different endpoints are all kept; the
/// qualified name keeps them apart.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tools: Vec<CatalogTool>,
    pub resources: Vec<CatalogResource>,
    pub prompts: Vec<CatalogPrompt>,
    by_qualified: HashMap<String, usize>,
}

impl Catalog {
    pub async fn aggregate(registry: &EndpointRegistry) -> Result<Self> {
        let mut catalog = Self::default();
        for (config, session) in registry.iter() {
            let endpoint = config.name.as_str();
            let tools = session
                .list_tools()
                .await
                .with_context(|| format!("listing tools of '{endpoint}'"))?;
            let resources = session
                .list_resources()
                .await
                .with_context(|| format!("listing resources of '{endpoint}'"))?;
            let prompts = session
                .list_prompts()
                .await
                .with_context(|| format!("listing prompts of '{endpoint}'"))?;

            info!(
                endpoint,
                tools = tools.len(),
                resources = resources.len(),
                prompts = prompts.len(),
                "catalog loaded"
            );

            for tool in tools {
                let qualified = qualified_name(endpoint, &tool.name);
                if !is_valid_tool_name(&qualified) {
                    warn!(
                        endpoint,
                        tool = %tool.name,
                        "skipping tool: '{}' is not a valid model tool name",
                        qualified
                    );
                    continue;
                }
                catalog.push_tool(CatalogTool {
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    endpoint: endpoint.to_string(),
                });
            }
            catalog
                .resources
                .extend(resources.into_iter().map(|info| CatalogResource {
                    info,
                    endpoint: endpoint.to_string(),
                }));
            catalog
                .prompts
                .extend(prompts.into_iter().map(|info| CatalogPrompt {
                    info,
                    endpoint: endpoint.to_string(),
                }));
        }
        Ok(catalog)
    }

    pub fn push_tool(&mut self, tool: CatalogTool) {
        self.by_qualified
            .insert(tool.qualified_name(), self.tools.len());
        self.tools.push(tool);
    }

    /// Tool list in the shape the completion provider sends to the model.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.tools
            .iter()
            .map(|t| ToolDef {
                name: t.qualified_name(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            })
            .collect()
    }

    pub fn resolve(&self, qualified: &str) -> Option<&CatalogTool> {
        self.by_qualified.get(qualified).map(|&i| &self.tools[i])
    }

    pub fn tools_for(&self, endpoint: &str) -> impl Iterator<Item = &CatalogTool> {
        let endpoint = endpoint.to_string();
        self.tools.iter().filter(move |t| t.endpoint == endpoint)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }
}
