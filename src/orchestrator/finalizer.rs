//! The last, tool-less model call made once the round budget is spent.

use futures::StreamExt;
use tracing::{debug, warn};

use super::budget::SessionGate;
use crate::error::CarnetError;
use crate::provider::{BackendRequest, ModelBackend};
use crate::types::Message;

/// Issues exactly one model call with no tools offered and returns its text.
pub struct ForcedFinalizer<'a> {
    backend: &'a dyn ModelBackend,
    prompt: Option<&'a str>,
}

impl<'a> ForcedFinalizer<'a> {
    pub fn new(backend: &'a dyn ModelBackend) -> Self {
        Self {
            backend,
            prompt: None,
        }
    }

    /// Extra system instruction sent with this call only.
    pub fn with_prompt(mut self, prompt: Option<&'a str>) -> Self {
        self.prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// The request the finalizer sends. The conversation itself is untouched.
    pub fn request(&self, conversation: &[Message]) -> BackendRequest {
        let mut messages = conversation.to_vec();
        if let Some(prompt) = self.prompt {
            messages.push(Message::system(prompt));
        }
        BackendRequest {
            messages,
            tools: None,
        }
    }

    /// Empty output is an error; there is no retry.
    pub(crate) async fn finalize(
        &self,
        conversation: &[Message],
        gate: &SessionGate,
    ) -> Result<String, CarnetError> {
        let request = self.request(conversation);
        let mut stream = gate.run(self.backend.stream(&request)).await??;

        let mut text = String::new();
        let mut discarded = 0usize;
        while let Some(item) = gate.run(stream.next()).await? {
            let chunk = item?;
            if let Some(content) = chunk.content {
                text.push_str(&content);
            }
            for fragment in chunk.tool_calls {
                discarded += 1;
                debug!(
                    tool_call_id = %fragment.id,
                    tool_name = fragment.function_name.as_deref().unwrap_or_default(),
                    "discarding tool-call fragment from forced call"
                );
            }
        }
        if discarded > 0 {
            warn!(
                fragments = discarded,
                "model attempted tool calls during forced finalization; discarded"
            );
        }

        if text.trim().is_empty() {
            return Err(CarnetError::Finalization(
                "model returned no content".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::budget::SessionBudget;
    use crate::provider::ChunkStream;
    use crate::types::{FinishReason, StreamChunk, ToolCallFragment};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct OneShot {
        chunks: Vec<StreamChunk>,
        seen: Mutex<Vec<BackendRequest>>,
    }

    #[async_trait]
    impl ModelBackend for OneShot {
        fn backend_name(&self) -> &str {
            "one-shot"
        }

        async fn stream(&self, request: &BackendRequest) -> Result<ChunkStream, CarnetError> {
            self.seen.lock().unwrap().push(request.clone());
            let items: Vec<Result<StreamChunk, CarnetError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn gate() -> SessionGate {
        let guard = SessionBudget::new(1, Duration::from_secs(60)).guard();
        SessionGate::new(CancellationToken::new(), guard)
    }

    #[tokio::test]
    async fn returns_text_and_offers_no_tools() {
        let backend = OneShot {
            chunks: vec![
                StreamChunk::content("Il fait "),
                StreamChunk::tool_call(ToolCallFragment::new("c9", Some("get_weather"), Some("{}"))),
                StreamChunk::content("18°C."),
                StreamChunk::finish(FinishReason::Stop),
            ],
            seen: Mutex::new(Vec::new()),
        };
        let conversation = vec![Message::user("Météo ?")];
        let text = ForcedFinalizer::new(&backend)
            .with_prompt(Some("Réponds maintenant."))
            .finalize(&conversation, &gate())
            .await
            .unwrap();

        assert_eq!(text, "Il fait 18°C.");
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].tools.is_none());
        assert_eq!(seen[0].messages.len(), 2);
        assert_eq!(seen[0].messages[1].text(), "Réponds maintenant.");
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn blank_output_is_a_finalization_error() {
        let backend = OneShot {
            chunks: vec![StreamChunk::content("  "), StreamChunk::finish(FinishReason::Stop)],
            seen: Mutex::new(Vec::new()),
        };
        let err = ForcedFinalizer::new(&backend)
            .finalize(&[Message::user("?")], &gate())
            .await
            .unwrap_err();
        assert!(matches!(err, CarnetError::Finalization(_)));
    }
}
