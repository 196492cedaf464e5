pub mod commands;
pub mod input;
pub mod query_loop;

pub use commands::Command;
pub use input::spawn_line_reader;
pub use query_loop::{QueryLoop, Step};
