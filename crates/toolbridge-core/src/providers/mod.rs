pub mod anthropic;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use provider::{ContentBlock, LlmProvider, LlmReply, Message, Role, TokenUsage};
