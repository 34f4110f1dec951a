//! Shared test helpers: a scripted model backend and canned tools.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use carnet::error::CarnetError;
use carnet::orchestrator::{EventStream, StreamEvent};
use carnet::provider::{BackendRequest, ChunkStream, ModelBackend};
use carnet::tools::{FnTool, ToolParameters};
use carnet::types::{FinishReason, StreamChunk, ToolCallFragment};

/// One step of a scripted model response.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(StreamChunk),
    Delay(Duration),
    Fail(String),
}

type Script = Result<Vec<Step>, String>;

/// Replays one script per model call and records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    repeat: Mutex<Option<Vec<Step>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response to the next call.
    pub fn push(&self, steps: Vec<Step>) -> &Self {
        self.scripts.lock().unwrap().push_back(Ok(steps));
        self
    }

    /// Queue a call that fails before any chunk is produced.
    pub fn push_open_error(&self, message: &str) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    /// Response for every call once the queue is empty.
    pub fn repeat(&self, steps: Vec<Step>) -> &Self {
        *self.repeat.lock().unwrap() = Some(steps);
        self
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn backend_name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: &BackendRequest) -> Result<ChunkStream, CarnetError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.scripts.lock().unwrap().pop_front();
        let steps = match next {
            Some(Ok(steps)) => steps,
            Some(Err(message)) => return Err(CarnetError::Stream(message)),
            None => match self.repeat.lock().unwrap().clone() {
                Some(steps) => steps,
                None => return Err(CarnetError::Stream("script exhausted".into())),
            },
        };

        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Chunk(chunk) => yield Ok(chunk),
                    Step::Delay(duration) => tokio::time::sleep(duration).await,
                    Step::Fail(message) => {
                        yield Err(CarnetError::Stream(message));
                        return;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

pub fn text(content: &str) -> Step {
    Step::Chunk(StreamChunk::content(content))
}

pub fn finish(reason: FinishReason) -> Step {
    Step::Chunk(StreamChunk::finish(reason))
}

pub fn tool_fragment(id: &str, name: Option<&str>, args: Option<&str>) -> Step {
    Step::Chunk(StreamChunk::tool_call(ToolCallFragment::new(id, name, args)))
}

/// A round that requests one complete call and ends with `tool_calls`.
pub fn tool_call_round(id: &str, name: &str, args: &str) -> Vec<Step> {
    vec![
        tool_fragment(id, Some(name), Some(args)),
        finish(FinishReason::ToolCalls),
    ]
}

/// A round that answers with text and ends with `stop`.
pub fn text_round(content: &str) -> Vec<Step> {
    vec![text(content), finish(FinishReason::Stop)]
}

pub async fn collect(events: EventStream) -> Vec<StreamEvent> {
    events.collect().await
}

pub fn event_types(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::event_type).collect()
}

/// `get_weather` always answers "18°C".
pub fn weather_tool() -> FnTool {
    FnTool::new(
        "get_weather",
        "Current weather for a city",
        ToolParameters::object()
            .string("city", "City name", true)
            .build(),
        |_args, _ctx| async move { Ok(serde_json::json!("18°C")) },
    )
}

pub fn divide_tool() -> FnTool {
    FnTool::new(
        "divide",
        "Divide a by b",
        ToolParameters::object()
            .number("a", "dividend", true)
            .number("b", "divisor", true)
            .build(),
        |args, _ctx| async move {
            let a = args.get_f64("a")?;
            let b = args.get_f64("b")?;
            if b == 0.0 {
                return Err(CarnetError::ToolExecution {
                    tool_name: "divide".into(),
                    message: "division by zero".into(),
                });
            }
            Ok(serde_json::json!(a / b))
        },
    )
}

/// Tool that sleeps for `delay`, then counts the execution.
pub fn counting_tool(name: &str, delay: Duration, counter: Arc<AtomicUsize>) -> FnTool {
    FnTool::new(
        name.to_string(),
        "Counts its executions",
        ToolParameters::empty(),
        move |_args, _ctx| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!("ok"))
            }
        },
    )
}
