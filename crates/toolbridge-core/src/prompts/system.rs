use crate::mcp::catalog::{Catalog, CatalogPrompt, CatalogResource};
use crate::tools::tool::ToolDef;

pub const BASE_PROMPT: &str = "You are a helpful assistant that can interact with various tools \
provided by registered MCP servers. Tool names have the form `<server>__<tool>`.";

pub struct SystemPromptBuilder {
    base: String,
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            sections: Vec::new(),
        }
    }
    pub fn with_tools(mut self, tools: &[ToolDef]) -> Self {
        if tools.is_empty() {
            return self;
        }
        let tool_list = tools
            .iter()
            .map(|t| format!("- `{}`: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        self.sections
            .push(format!("## Available Tools\n{}", tool_list));
        self
    }
    pub fn with_resources(mut self, resources: &[CatalogResource]) -> Self {
        if resources.is_empty() {
            return self;
        }
        let list = resources
            .iter()
            .map(|r| {
                let mut line = format!("- `{}` ({}) from {}", r.info.uri, r.info.name, r.endpoint);
                if !r.info.mime_type.is_empty() {
                    line.push_str(&format!(" [{}]", r.info.mime_type));
                }
                if !r.info.description.is_empty() {
                    line.push_str(&format!(": {}", r.info.description));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.sections
            .push(format!("## Available Resources\n{}", list));
        self
    }
    pub fn with_prompts(mut self, prompts: &[CatalogPrompt]) -> Self {
        if prompts.is_empty() {
            return self;
        }
        let list = prompts
            .iter()
            .map(|p| {
                let args = p
                    .info
                    .arguments
                    .iter()
                    .map(|a| {
                        if a.required {
                            a.name.clone()
                        } else {
                            format!("{}?", a.name)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "- `{}`({}) from {}: {}",
                    p.info.name, args, p.endpoint, p.info.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.sections
            .push(format!("## Available Prompts\n{}", list));
        self
    }
    pub fn with_catalog(self, catalog: &Catalog) -> Self {
        self.with_resources(&catalog.resources)
            .with_prompts(&catalog.prompts)
            .with_tools(&catalog.tool_defs())
    }
    pub fn build(self) -> String {
        if self.sections.is_empty() {
            return self.base;
        }
        format!("{}\n\n{}", self.base, self.sections.join("\n\n"))
    }
}
