//! Model backend trait and the built-in OpenAI-compatible transport.

pub mod http;
pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::CarnetError;
use crate::tools::ToolSpec;
use crate::types::{Message, StreamChunk};

pub use openai::OpenAiCompatibleBackend;

/// Stream of incremental model output.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, CarnetError>>;

/// A request sent to a model backend.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub messages: Vec<Message>,
    /// Tools offered for this call. `None` means the model is not offered any
    /// tool at all, which is how forced finalization prevents further calls.
    pub tools: Option<Vec<ToolSpec>>,
}

/// Black-box streaming token source.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logs (e.g. "openai-compatible").
    fn backend_name(&self) -> &str;

    /// Open a stream for the given conversation and tools.
    async fn stream(&self, request: &BackendRequest) -> Result<ChunkStream, CarnetError>;
}
