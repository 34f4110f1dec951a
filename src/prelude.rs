//! Convenience re-exports for common use.

pub use crate::config::{BackendConfig, CarnetConfig, OrchestratorConfig};
pub use crate::error::{CarnetError, Result};
pub use crate::orchestrator::{EventStream, StreamEvent, StreamOrchestrator, StreamRequest};
pub use crate::provider::{BackendRequest, ModelBackend, OpenAiCompatibleBackend};
pub use crate::store::{InMemorySessionStore, SessionRecord, SessionStore};
pub use crate::tools::{
    AuthContext, FnTool, Tool, ToolArguments, ToolExecutor, ToolParameters, ToolRegistry, ToolSpec,
};
pub use crate::types::{ExecutedToolResult, FinishReason, Message, Role, StreamChunk, ToolCall};
