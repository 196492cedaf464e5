use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::mcp::client::{McpSession, ToolOutput};
use crate::mcp::registry::EndpointRegistry;

use super::tool::ToolInvocation;

/// How a dispatched invocation ended. Outcomes are logged as they happen;
/// nothing here is fed back into the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed {
        invocation: ToolInvocation,
        output: ToolOutput,
    },
    Failed {
        invocation: ToolInvocation,
        error: String,
    },
    UnknownEndpoint {
        invocation: ToolInvocation,
    },
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub outcomes: Vec<DispatchOutcome>,
    /// Tasks cancelled at the end of the grace period, or that panicked.
    pub aborted: usize,
}

#[derive(Default)]
struct Settled {
    outcomes: Vec<DispatchOutcome>,
    aborted: usize,
}

impl Settled {
    fn record(&mut self, joined: Result<DispatchOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.outcomes.push(outcome),
            Err(e) => {
                if !e.is_cancelled() {
                    error!("tool task panicked: {}", e);
                }
                self.aborted += 1;
            }
        }
    }
}

/// Runs tool invocations as background tasks without blocking the caller.
///
/// At most `max_inflight` invocations run at once. When the set is full,
/// `dispatch` waits for one of them to finish before spawning the next.
/// `shutdown` joins whatever is left.
pub struct ToolDispatcher {
    registry: Arc<EndpointRegistry>,
    tasks: JoinSet<DispatchOutcome>,
    max_inflight: usize,
    settled: Settled,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<EndpointRegistry>, max_inflight: usize) -> Self {
        Self {
            registry,
            tasks: JoinSet::new(),
            max_inflight: max_inflight.max(1),
            settled: Settled::default(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Start `invocation` on its endpoint. Returns once the task is spawned,
    /// not when it completes.
    pub async fn dispatch(&mut self, invocation: ToolInvocation) {
        let Some(session) = self.registry.session(&invocation.endpoint) else {
            error!(
                "Endpoint '{}' not found in registered endpoints, dropping call to '{}'",
                invocation.endpoint, invocation.tool
            );
            self.settled
                .outcomes
                .push(DispatchOutcome::UnknownEndpoint { invocation });
            return;
        };

        while let Some(joined) = self.tasks.try_join_next() {
            self.settled.record(joined);
        }
        while self.tasks.len() >= self.max_inflight {
            debug!(
                "{} tool call(s) in flight, waiting for a slot",
                self.tasks.len()
            );
            match self.tasks.join_next().await {
                Some(joined) => self.settled.record(joined),
                None => break,
            }
        }

        debug!(
            "Dispatching {} on '{}' ({}) with input: {}",
            invocation.tool,
            invocation.endpoint,
            self.registry
                .config(&invocation.endpoint)
                .map_or("", |c| c.url.as_str()),
            invocation.input
        );
        self.tasks.spawn(invoke(session, invocation));
    }

    /// Outcomes of every invocation that has finished since the last call.
    pub fn reap(&mut self) -> Vec<DispatchOutcome> {
        while let Some(joined) = self.tasks.try_join_next() {
            self.settled.record(joined);
        }
        std::mem::take(&mut self.settled.outcomes)
    }

    /// Wait up to `grace` for in-flight invocations, then abort the rest.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = self.tasks.join_next() => match joined {
                    Some(joined) => self.settled.record(joined),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!("aborting {} unfinished tool call(s)", self.tasks.len());
                    self.tasks.abort_all();
                    while let Some(joined) = self.tasks.join_next().await {
                        self.settled.record(joined);
                    }
                    break;
                }
            }
        }

        ShutdownReport {
            outcomes: self.settled.outcomes,
            aborted: self.settled.aborted,
        }
    }
}

async fn invoke(session: Arc<dyn McpSession>, invocation: ToolInvocation) -> DispatchOutcome {
    match session
        .call_tool(&invocation.tool, invocation.input.clone())
        .await
    {
        Ok(output) if !output.is_error => {
            info!(
                "Tool {} from endpoint {} returned: {}",
                invocation.tool, invocation.endpoint, output.content
            );
            DispatchOutcome::Completed { invocation, output }
        }
        Ok(output) => {
            error!(
                "Tool {} from endpoint {} reported an error: {}",
                invocation.tool, invocation.endpoint, output.content
            );
            DispatchOutcome::Failed {
                invocation,
                error: output.content,
            }
        }
        Err(e) => {
            error!(
                "Error calling tool {} from endpoint {}: {:#}",
                invocation.tool, invocation.endpoint, e
            );
            DispatchOutcome::Failed {
                invocation,
                error: format!("{e:#}"),
            }
        }
    }
}
