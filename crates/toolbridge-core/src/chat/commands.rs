use crate::mcp::catalog::Catalog;

/// Slash commands understood at the `Query:` prompt. None of them touch the
/// conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tools,
    Resources,
    Prompts,
    Help,
    Exit,
    Unknown(String),
}

impl Command {
    /// `None` when the line is an ordinary query.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix('/')?;
        let name = rest.split_whitespace().next().unwrap_or("");
        Some(match name {
            "tools" => Self::Tools,
            "resources" => Self::Resources,
            "prompts" => Self::Prompts,
            "help" => Self::Help,
            "exit" | "quit" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        })
    }
}

pub fn help_text() -> String {
    [
        "commands:",
        "  /tools      list tools offered to the model",
        "  /resources  list resources advertised by the servers",
        "  /prompts    list prompts advertised by the servers",
        "  /exit       wait for running tool calls and quit",
    ]
    .join("\n")
}

pub fn render_tools(catalog: &Catalog) -> String {
    if catalog.tools.is_empty() {
        return "no tools discovered".to_string();
    }
    let mut out = format!("{} tools:", catalog.tools.len());
    for t in &catalog.tools {
        out.push_str(&format!("\n  {:30} {}", t.qualified_name(), t.description));
    }
    out
}

pub fn render_resources(catalog: &Catalog) -> String {
    if catalog.resources.is_empty() {
        return "no resources discovered".to_string();
    }
    let mut out = format!("{} resources:", catalog.resources.len());
    for r in &catalog.resources {
        out.push_str(&format!("\n  [{}] {}  {}", r.endpoint, r.info.uri, r.info.name));
    }
    out
}

pub fn render_prompts(catalog: &Catalog) -> String {
    if catalog.prompts.is_empty() {
        return "no prompts discovered".to_string();
    }
    let mut out = format!("{} prompts:", catalog.prompts.len());
    for p in &catalog.prompts {
        out.push_str(&format!("\n  [{}] {}  {}", p.endpoint, p.info.name, p.info.description));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("/tools"), Some(Command::Tools));
        assert_eq!(Command::parse("  /quit  "), Some(Command::Exit));
        assert_eq!(Command::parse("/exit now"), Some(Command::Exit));
        assert_eq!(
            Command::parse("/nope"),
            Some(Command::Unknown("nope".to_string()))
        );
    }

    #[test]
    fn ordinary_queries_are_not_commands() {
        assert_eq!(Command::parse("what is /tools?"), None);
        assert_eq!(Command::parse("hello"), None);
    }

    #[test]
    fn empty_catalog_renders_placeholders() {
        let catalog = Catalog::default();
        assert_eq!(render_tools(&catalog), "no tools discovered");
        assert_eq!(render_resources(&catalog), "no resources discovered");
        assert_eq!(render_prompts(&catalog), "no prompts discovered");
    }
}
