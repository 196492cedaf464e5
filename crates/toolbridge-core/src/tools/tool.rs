use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::catalog::{split_qualified, Catalog};

/// Tool definition as offered to the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A model's request to run one tool on one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub endpoint: String,
    pub tool: String,
    pub input: Value,
}

impl ToolInvocation {
    /// Route a `tool_use` block back to its endpoint.
    ///
    /// The catalog is consulted first; a name it does not know is still split
    /// on the qualifier so the dispatcher can report the unknown endpoint. A
    /// name without a qualifier yields an empty endpoint, which never matches.
    pub fn from_tool_use(id: &str, name: &str, input: Value, catalog: &Catalog) -> Self {
        let (endpoint, tool) = match catalog.resolve(name) {
            Some(t) => (t.endpoint.clone(), t.name.clone()),
            None => match split_qualified(name) {
                Some((endpoint, tool)) => (endpoint.to_string(), tool.to_string()),
                None => (String::new(), name.to_string()),
            },
        };
        Self {
            id: id.to_string(),
            endpoint,
            tool,
            input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::catalog::CatalogTool;
    use serde_json::json;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.push_tool(CatalogTool {
            name: "read__all".into(),
            description: String::new(),
            input_schema: json!({}),
            endpoint: "notes".into(),
        });
        catalog
    }

    #[test]
    fn resolves_known_tool_through_catalog() {
        let inv = ToolInvocation::from_tool_use("t1", "notes__read__all", json!({}), &catalog());
        assert_eq!(inv.endpoint, "notes");
        assert_eq!(inv.tool, "read__all");
        assert_eq!(inv.id, "t1");
    }

    #[test]
    fn unknown_qualified_name_keeps_endpoint_for_reporting() {
        let inv = ToolInvocation::from_tool_use("t2", "ghost__run", json!({"x": 1}), &catalog());
        assert_eq!(inv.endpoint, "ghost");
        assert_eq!(inv.tool, "run");
        assert_eq!(inv.input, json!({"x": 1}));
    }

    #[test]
    fn unqualified_name_has_no_endpoint() {
        let inv = ToolInvocation::from_tool_use("t3", "run", json!({}), &catalog());
        assert!(inv.endpoint.is_empty());
        assert_eq!(inv.tool, "run");
    }
}
