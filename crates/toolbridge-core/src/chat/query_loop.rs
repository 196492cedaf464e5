use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::mcp::catalog::Catalog;
use crate::mcp::registry::EndpointRegistry;
use crate::prompts::{SystemPromptBuilder, BASE_PROMPT};
use crate::providers::provider::{LlmProvider, LlmReply};
use crate::session::Conversation;
use crate::tools::dispatch::{ShutdownReport, ToolDispatcher};
use crate::tools::tool::{ToolDef, ToolInvocation};

use super::commands::{self, Command};

pub const PROMPT: &str = "\nQuery: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit,
}

/// Reads queries, asks the model, prints replies and hands tool-use requests
/// to the dispatcher.
pub struct QueryLoop {
    provider: Box<dyn LlmProvider>,
    catalog: Catalog,
    tool_defs: Vec<ToolDef>,
    conversation: Conversation,
    dispatcher: ToolDispatcher,
}

impl QueryLoop {
    pub fn new(
        provider: Box<dyn LlmProvider>,
        registry: Arc<EndpointRegistry>,
        catalog: Catalog,
        config: &BridgeConfig,
    ) -> Self {
        let preamble = SystemPromptBuilder::new(BASE_PROMPT)
            .with_catalog(&catalog)
            .build();
        Self {
            provider,
            tool_defs: catalog.tool_defs(),
            catalog,
            conversation: Conversation::new(Some(preamble), config.max_history_messages),
            dispatcher: ToolDispatcher::new(registry, config.max_inflight_tools),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Prompt until end of input, `/exit`, or a failed completion call.
    ///
    /// Lines come from a channel (see [`spawn_line_reader`]); receiving is
    /// cancel safe, so the caller may race this against a shutdown signal.
    ///
    /// [`spawn_line_reader`]: super::input::spawn_line_reader
    pub async fn run<W>(&mut self, mut input: mpsc::Receiver<String>, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            write_flush(out, PROMPT).await?;
            let Some(line) = input.recv().await else {
                debug!("end of input");
                break;
            };
            if self.handle_line(&line, out).await? == Step::Exit {
                break;
            }
        }
        Ok(())
    }

    pub async fn handle_line<W>(&mut self, line: &str, out: &mut W) -> Result<Step>
    where
        W: AsyncWrite + Unpin,
    {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Step::Continue);
        }
        if let Some(command) = Command::parse(line) {
            return self.run_command(command, out).await;
        }
        self.process(line, out).await?;
        Ok(Step::Continue)
    }

    /// One round trip. History only changes when the completion call succeeds.
    pub async fn process<W>(&mut self, query: &str, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        for outcome in self.dispatcher.reap() {
            debug!("settled: {:?}", outcome);
        }

        let messages = self.conversation.request_messages(query);
        let reply = self
            .provider
            .complete(&messages, &self.tool_defs)
            .await
            .context("completion request failed")?;

        write_flush(out, &format!("Response: {}\n", reply.text())).await?;
        let evicted = self.conversation.evicted();
        self.conversation.commit_turn(query, assistant_record(&reply));
        if self.conversation.evicted() > evicted {
            debug!(
                "history window full, {} message(s) evicted so far",
                self.conversation.evicted()
            );
        }

        let invocations: Vec<ToolInvocation> = reply
            .tool_uses()
            .map(|(id, name, input)| {
                ToolInvocation::from_tool_use(id, name, input.clone(), &self.catalog)
            })
            .collect();
        if !invocations.is_empty() {
            info!("model requested {} tool call(s)", invocations.len());
        }
        for invocation in invocations {
            self.dispatcher.dispatch(invocation).await;
        }
        Ok(())
    }

    async fn run_command<W>(&mut self, command: Command, out: &mut W) -> Result<Step>
    where
        W: AsyncWrite + Unpin,
    {
        let text = match command {
            Command::Exit => return Ok(Step::Exit),
            Command::Tools => commands::render_tools(&self.catalog),
            Command::Resources => commands::render_resources(&self.catalog),
            Command::Prompts => commands::render_prompts(&self.catalog),
            Command::Help => commands::help_text(),
            Command::Unknown(name) => {
                format!("unknown command '/{name}'\n{}", commands::help_text())
            }
        };
        write_flush(out, &format!("{text}\n")).await?;
        Ok(Step::Continue)
    }

    /// Join outstanding tool calls, aborting any still running after `grace`.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        self.dispatcher.shutdown(grace).await
    }
}

/// What the history keeps for the assistant side of a turn. The Messages API
/// rejects empty assistant content, so a tool-only reply is summarized.
fn assistant_record(reply: &LlmReply) -> String {
    let text = reply.text();
    if !text.trim().is_empty() {
        return text;
    }
    let names: Vec<&str> = reply.tool_uses().map(|(_, name, _)| name).collect();
    if names.is_empty() {
        "(no response)".to_string()
    } else {
        format!("(requested tool calls: {})", names.join(", "))
    }
}

async fn write_flush<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}
