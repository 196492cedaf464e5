pub mod chat;
pub mod config;
pub mod mcp;
pub mod prompts;
pub mod providers;
pub mod session;
pub mod tools;

pub use chat::{spawn_line_reader, QueryLoop, Step};
pub use config::{BridgeConfig, EndpointConfig};
pub use mcp::{Catalog, EndpointRegistry, McpClient, McpError, McpSession};
pub use providers::provider::{ContentBlock, LlmProvider, LlmReply, Message, Role, TokenUsage};
pub use providers::AnthropicProvider;
pub use session::Conversation;
pub use tools::{DispatchOutcome, ShutdownReport, ToolDef, ToolDispatcher, ToolInvocation};
