//! OpenAI-compatible Chat Completions streaming backend.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::CarnetError;
use crate::types::{FinishReason, Message, Role, StreamChunk, ToolCallFragment};

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error};
use super::{BackendRequest, ChunkStream, ModelBackend};

/// Streams from any `/chat/completions` endpoint speaking the OpenAI wire format.
pub struct OpenAiCompatibleBackend {
    config: BackendConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            client: shared_client().clone(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_request_body(&self, request: &BackendRequest) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_openai)
            .collect::<Vec<_>>();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
        });

        if let (Some(tools), Some(obj)) = (request.tools.as_ref(), body.as_object_mut()) {
            if !tools.is_empty() {
                let tool_defs: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tool_defs.into());
            }
        }

        body
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    fn backend_name(&self) -> &str {
        "openai-compatible"
    }

    async fn stream(&self, request: &BackendRequest) -> Result<ChunkStream, CarnetError> {
        let body = self.build_request_body(request);
        let url = self.endpoint();

        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "OpenAI-compatible stream"
        );

        let resp = self
            .client
            .post(&url)
            .headers(bearer_headers(self.config.api_key.as_deref()))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut ids = ToolCallIdResolver::default();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(CarnetError::Network(e));
                        break;
                    }
                };

                // Multi-byte characters can straddle reads; decode whole lines only.
                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = match std::str::from_utf8(&raw) {
                        Ok(line) => line.trim(),
                        Err(err) => {
                            debug!(error = %err, "skipping non UTF-8 stream line");
                            continue;
                        }
                    };

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = parse_sse_data(&line) else {
                        continue;
                    };
                    match serde_json::from_str::<OpenAiStreamChunk>(data) {
                        Ok(OpenAiStreamChunk { error: Some(err), .. }) => {
                            yield Err(CarnetError::Stream(err.message));
                            return;
                        }
                        Ok(parsed) => {
                            if let Some(chunk) = convert_chunk(parsed, &mut ids) {
                                yield Ok(chunk);
                            }
                        }
                        Err(err) => debug!(error = %err, "skipping unparseable stream chunk"),
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Gives every tool-call fragment a stable id.
///
/// OpenAI sends the id only on a call's first fragment and identifies the
/// rest by `index`.
#[derive(Default)]
struct ToolCallIdResolver {
    by_index: HashMap<u32, String>,
    last: Option<String>,
}

impl ToolCallIdResolver {
    fn resolve(&mut self, index: Option<u32>, id: Option<String>) -> String {
        let id = match (id.filter(|id| !id.is_empty()), index) {
            (Some(id), Some(index)) => {
                self.by_index.insert(index, id.clone());
                id
            }
            (Some(id), None) => id,
            (None, Some(index)) => self
                .by_index
                .entry(index)
                .or_insert_with(|| format!("call_{index}"))
                .clone(),
            (None, None) => self.last.clone().unwrap_or_else(|| "call_0".to_string()),
        };
        self.last = Some(id.clone());
        id
    }
}

fn convert_chunk(chunk: OpenAiStreamChunk, ids: &mut ToolCallIdResolver) -> Option<StreamChunk> {
    let choice = chunk.choices.into_iter().next()?;
    let delta = choice.delta.unwrap_or_default();
    let tool_calls = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let function = tc.function.unwrap_or_default();
            ToolCallFragment {
                id: ids.resolve(tc.index, tc.id),
                function_name: function.name,
                arguments_json: function.arguments,
            }
        })
        .collect();
    Some(StreamChunk {
        content: delta.content,
        reasoning: delta.reasoning_content.or(delta.reasoning),
        tool_calls,
        finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
    })
}

fn message_to_openai(msg: &Message) -> serde_json::Value {
    match msg.role {
        Role::System => serde_json::json!({ "role": "system", "content": msg.text() }),
        Role::User => serde_json::json!({ "role": "user", "content": msg.text() }),
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.text(),
        }),
        Role::Assistant if msg.tool_calls.is_empty() => {
            serde_json::json!({ "role": "assistant", "content": msg.text() })
        }
        Role::Assistant => {
            let tool_calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    let arguments = if tc.arguments_json.trim().is_empty() {
                        "{}"
                    } else {
                        tc.arguments_json.as_str()
                    };
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.function_name, "arguments": arguments },
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": msg.content,
                "tool_calls": tool_calls,
            })
        }
    }
}

// OpenAI wire types (internal)

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Deserialize)]
struct OpenAiStreamError {
    message: String,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: Option<OpenAiStreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize, Default)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutedToolResult, ToolCall};

    #[test]
    fn continuation_fragments_inherit_id_by_index() {
        let mut ids = ToolCallIdResolver::default();
        assert_eq!(ids.resolve(Some(0), Some("call_a".into())), "call_a");
        assert_eq!(ids.resolve(Some(1), Some("call_b".into())), "call_b");
        assert_eq!(ids.resolve(Some(0), None), "call_a");
        assert_eq!(ids.resolve(None, None), "call_a");
        assert_eq!(ids.resolve(Some(2), Some(String::new())), "call_2");
    }

    #[test]
    fn converts_tool_call_delta_chunk() {
        let raw = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":"{\"ci"}}]},"finish_reason":null}]}"#;
        let parsed: OpenAiStreamChunk = serde_json::from_str(raw).unwrap();
        let chunk = convert_chunk(parsed, &mut ToolCallIdResolver::default()).unwrap();
        assert_eq!(
            chunk.tool_calls,
            vec![ToolCallFragment::new("call_1", Some("get_weather"), Some("{\"ci"))]
        );
        assert_eq!(chunk.finish_reason, None);
    }

    #[test]
    fn serializes_tool_round_trip_messages() {
        let assistant =
            Message::assistant_with_tool_calls("", vec![ToolCall::new("c1", "get_weather", "")]);
        let json = message_to_openai(&assistant);
        assert_eq!(json["content"], serde_json::Value::Null);
        assert_eq!(json["tool_calls"][0]["function"]["arguments"], "{}");

        let tool = Message::tool_result(&ExecutedToolResult {
            tool_call_id: "c1".into(),
            name: "get_weather".into(),
            content: "18°C".into(),
            succeeded: true,
        });
        let json = message_to_openai(&tool);
        assert_eq!(json["tool_call_id"], "c1");
        assert_eq!(json["content"], "18°C");
    }

    #[test]
    fn no_tools_omits_tools_field() {
        let backend = OpenAiCompatibleBackend::new(BackendConfig::default());
        let body = backend.build_request_body(&BackendRequest {
            messages: vec![Message::user("hi")],
            tools: None,
        });
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);
    }
}
