//! Tool system: handler trait, argument access, and the per-session registry.

pub mod arguments;
pub mod builtin;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use registry::{ToolExecutor, ToolOutcome, ToolRegistry, ToolRegistryBuilder};
pub use tool::{AuthContext, FnTool, Tool, ToolExecutionContext};
pub use types::{ToolParameters, ToolSpec};
