//! Outbound events, their wire framing, and the session's event channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::budget::SessionGate;
use crate::error::CarnetError;
use crate::types::{ExecutedToolResult, FinishReason, StreamChunk, ToolCall, ToolCallFragment};

/// One event of the outbound stream. Serialized as a flat JSON object tagged
/// by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Start {
        timestamp: DateTime<Utc>,
    },
    Delta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallFragment>,
    },
    AssistantRoundComplete {
        content: String,
        tool_calls: Vec<ToolCall>,
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forced: Option<bool>,
    },
    ToolExecution {
        tool_count: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        external_tools: Vec<String>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        success: bool,
        result: String,
    },
    Done {
        rounds: usize,
    },
    Error {
        error: String,
    },
}

impl StreamEvent {
    pub fn start() -> Self {
        Self::Start {
            timestamp: Utc::now(),
        }
    }

    pub fn delta(chunk: StreamChunk) -> Self {
        Self::Delta {
            content: chunk.content,
            reasoning: chunk.reasoning,
            tool_calls: chunk.tool_calls,
        }
    }

    pub fn tool_result(result: &ExecutedToolResult) -> Self {
        Self::ToolResult {
            tool_call_id: result.tool_call_id.clone(),
            tool_name: result.name.clone(),
            success: result.succeeded,
            result: result.content.clone(),
        }
    }

    pub fn error(err: &CarnetError) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }

    /// Wire name of the event kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Delta { .. } => "delta",
            Self::AssistantRoundComplete { .. } => "assistant_round_complete",
            Self::ToolExecution { .. } => "tool_execution",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// `done` or `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn to_json(&self) -> Result<String, CarnetError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Server-Sent Events framing: `data: <json>\n\n`.
    pub fn to_sse(&self) -> Result<String, CarnetError> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }

    /// Newline-delimited JSON framing.
    pub fn to_ndjson(&self) -> Result<String, CarnetError> {
        Ok(format!("{}\n", self.to_json()?))
    }
}

/// Sending half of a session's event channel.
pub(crate) struct EventEmitter {
    tx: mpsc::Sender<StreamEvent>,
    gate: SessionGate,
}

impl EventEmitter {
    pub(crate) fn new(tx: mpsc::Sender<StreamEvent>, gate: SessionGate) -> Self {
        Self { tx, gate }
    }

    /// Send a non-terminal event. Checks the deadline first; a closed receiver
    /// counts as cancellation.
    pub(crate) async fn emit(&self, event: StreamEvent) -> Result<(), CarnetError> {
        self.gate.check()?;
        self.gate
            .run(self.tx.send(event))
            .await?
            .map_err(|_| CarnetError::Canceled)
    }

    /// Send the terminal event. The deadline does not apply; once the session
    /// is canceled delivery is best effort.
    pub(crate) async fn finish(&self, event: StreamEvent) {
        if self.gate.is_canceled() {
            let _ = self.tx.try_send(event);
            return;
        }
        tokio::select! {
            _ = self.tx.send(event) => {}
            _ = self.gate.canceled() => {}
        }
    }
}

/// Handle on a running session.
///
/// Yields the session's events in order and ends after the terminal event.
/// Dropping the handle cancels the session.
pub struct EventStream {
    session_id: Uuid,
    inner: ReceiverStream<StreamEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl EventStream {
    pub(crate) fn new(
        session_id: Uuid,
        rx: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            inner: ReceiverStream::new(rx),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Abort the session. In-flight model and tool work is dropped; at most
    /// an `error` event follows.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("session_id", &self.session_id)
            .field("canceled", &self.cancel.is_cancelled())
            .finish()
    }
}
