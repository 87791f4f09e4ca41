//! Built-in tool implementations for the agentic runtime.
//!
//! These are system tools with direct OS interaction. Concrete tool
//! implementations beyond this baseline set are a caller concern — the
//! CORE only depends on the `Tool` trait.

pub mod bash;
pub mod file_read;
pub mod file_write;

pub use bash::BashExecuteTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
