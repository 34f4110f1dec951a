//! Streaming types produced by model backends.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// An incremental piece of one tool invocation.
///
/// Backends may deliver a whole call in one fragment or split it across
/// many; `id` is stable across all fragments of the same call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFragment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(
        default,
        rename = "argumentsJSON",
        skip_serializing_if = "Option::is_none"
    )]
    pub arguments_json: Option<String>,
}

impl ToolCallFragment {
    pub fn new(
        id: impl Into<String>,
        function_name: Option<&str>,
        arguments_json: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.map(str::to_string),
            arguments_json: arguments_json.map(str::to_string),
        }
    }
}

/// One chunk of model output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Advisory reasoning trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    /// A chunk carrying only text.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    /// A chunk carrying only reasoning text.
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Default::default()
        }
    }

    /// A chunk carrying a single tool-call fragment.
    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Default::default()
        }
    }

    /// A chunk carrying only a finish reason.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    /// Whether the chunk has anything worth forwarding as a `delta`.
    pub fn has_payload(&self) -> bool {
        self.content.as_deref().is_some_and(|s| !s.is_empty())
            || self.reasoning.as_deref().is_some_and(|s| !s.is_empty())
            || !self.tool_calls.is_empty()
    }
}

/// Why the backend ended a stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// Any value the backend sent that Carnet does not recognize.
    #[serde(other)]
    Unknown,
}

impl FinishReason {
    /// Parse a backend finish reason; unrecognized values map to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(Self::Unknown)
    }
}

/// Terminal signal of one round, after normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TerminalSignal {
    Stop,
    ToolCalls,
    Length,
    None,
}

impl TerminalSignal {
    /// Raw signal for a backend finish reason. A content-filter stop ends the
    /// turn like `stop`.
    pub fn from_finish_reason(reason: Option<FinishReason>) -> Self {
        match reason {
            Some(FinishReason::Stop | FinishReason::ContentFilter) => Self::Stop,
            Some(FinishReason::Length) => Self::Length,
            Some(FinishReason::ToolCalls) => Self::ToolCalls,
            Some(FinishReason::Unknown) | None => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_parses_known_and_unknown_values() {
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("function_call"), FinishReason::Unknown);
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool_calls");
    }

    #[test]
    fn terminal_signal_from_finish_reason() {
        assert_eq!(
            TerminalSignal::from_finish_reason(Some(FinishReason::ContentFilter)),
            TerminalSignal::Stop
        );
        assert_eq!(
            TerminalSignal::from_finish_reason(Some(FinishReason::Unknown)),
            TerminalSignal::None
        );
        assert_eq!(TerminalSignal::from_finish_reason(None), TerminalSignal::None);
    }

    #[test]
    fn empty_chunks_have_no_payload() {
        assert!(!StreamChunk::finish(FinishReason::Stop).has_payload());
        assert!(!StreamChunk::content("").has_payload());
        assert!(StreamChunk::reasoning("hmm").has_payload());
    }
}
