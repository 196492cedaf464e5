pub mod catalog;
pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{Catalog, CatalogPrompt, CatalogResource, CatalogTool};
pub use client::{McpClient, McpSession, ToolOutput};
pub use error::McpError;
pub use registry::EndpointRegistry;
pub use transport::SseTransport;
