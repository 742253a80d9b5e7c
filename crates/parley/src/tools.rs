pub mod code_interpreter;
pub mod handler;
pub mod rag;
pub mod registry;

pub use handler::{ToolCallParams, ToolHandler, ToolOutcome};
pub use registry::ToolRegistry;
