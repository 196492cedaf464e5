pub mod dispatch;
pub mod tool;

pub use dispatch::{DispatchOutcome, ShutdownReport, ToolDispatcher};
pub use tool::{ToolDef, ToolInvocation};
