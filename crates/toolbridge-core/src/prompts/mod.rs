pub mod system;

pub use system::{SystemPromptBuilder, BASE_PROMPT};
