//! Per-round state: text, reasoning, tool calls and the terminal signal.

use tracing::warn;

use super::accumulator::ToolCallAccumulator;
use crate::types::{FinishReason, StreamChunk, TerminalSignal, ToolCall};

/// One iteration of the loop, alive from stream open to stream end.
#[derive(Debug)]
pub struct RoundState {
    index: usize,
    text: String,
    reasoning: String,
    accumulator: ToolCallAccumulator,
    finish_reason: Option<FinishReason>,
}

impl RoundState {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            text: String::new(),
            reasoning: String::new(),
            accumulator: ToolCallAccumulator::new(),
            finish_reason: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Fold a chunk into the round and return the part worth forwarding.
    ///
    /// The first finish reason wins and seals the accumulator; fragments that
    /// arrive afterwards are dropped and not forwarded.
    pub fn absorb(&mut self, chunk: StreamChunk) -> Option<StreamChunk> {
        let StreamChunk {
            content,
            reasoning,
            tool_calls,
            finish_reason,
        } = chunk;

        if let Some(text) = content.as_deref() {
            self.text.push_str(text);
        }
        if let Some(trace) = reasoning.as_deref() {
            self.reasoning.push_str(trace);
        }
        let accepted: Vec<_> = tool_calls
            .into_iter()
            .filter(|fragment| self.accumulator.ingest(fragment))
            .collect();
        if let Some(reason) = finish_reason {
            self.finish_reason.get_or_insert(reason);
            self.accumulator.seal();
        }

        let forward = StreamChunk {
            content,
            reasoning,
            tool_calls: accepted,
            finish_reason: None,
        };
        forward.has_payload().then_some(forward)
    }

    /// Raw terminal signal, before the fail-safe rules.
    pub fn terminal_signal(&self) -> TerminalSignal {
        TerminalSignal::from_finish_reason(self.finish_reason)
    }

    /// Seal the round once its stream has ended.
    pub fn finish(mut self) -> RoundOutcome {
        self.accumulator.seal();
        let raw = self.terminal_signal();
        let tool_calls = self.accumulator.into_calls();
        let (signal, unrecognized) = resolve_signal(raw, !tool_calls.is_empty());

        if raw == TerminalSignal::Stop && !tool_calls.is_empty() {
            warn!(
                round = self.index,
                tool_calls = tool_calls.len(),
                "model stopped with tool calls; ignoring them"
            );
        }
        if self.finish_reason == Some(FinishReason::ContentFilter) {
            warn!(round = self.index, "model output stopped by content filter");
        }

        RoundOutcome {
            index: self.index,
            text: self.text,
            reasoning: self.reasoning,
            tool_calls: if signal == TerminalSignal::ToolCalls {
                tool_calls
            } else {
                Vec::new()
            },
            finish_reason: self.finish_reason,
            signal,
            unrecognized,
        }
    }
}

/// A finished round, ready to be folded into the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub index: usize,
    pub text: String,
    pub reasoning: String,
    /// Calls to execute. Empty unless `signal` is `ToolCalls`.
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    /// Resolved signal: never `None`.
    pub signal: TerminalSignal,
    /// The backend's signal was missing, unrecognized, or inconsistent.
    pub unrecognized: bool,
}

impl RoundOutcome {
    /// Finish reason reported on `assistant_round_complete`.
    pub fn reported_finish_reason(&self) -> FinishReason {
        match self.signal {
            TerminalSignal::ToolCalls => FinishReason::ToolCalls,
            TerminalSignal::Length => FinishReason::Length,
            TerminalSignal::Stop | TerminalSignal::None => FinishReason::Stop,
        }
    }
}

/// Map a raw signal to the action taken. Anything that is not a clean
/// `stop`, `length` or `tool_calls` with calls is counted as unrecognized;
/// with no calls to run it falls back to `stop`.
fn resolve_signal(raw: TerminalSignal, has_calls: bool) -> (TerminalSignal, bool) {
    match (raw, has_calls) {
        (TerminalSignal::Stop, _) => (TerminalSignal::Stop, false),
        (TerminalSignal::Length, _) => (TerminalSignal::Length, false),
        (TerminalSignal::ToolCalls, true) => (TerminalSignal::ToolCalls, false),
        (TerminalSignal::ToolCalls, false) => (TerminalSignal::Stop, true),
        (TerminalSignal::None, true) => (TerminalSignal::ToolCalls, true),
        (TerminalSignal::None, false) => (TerminalSignal::Stop, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCallFragment;

    fn tool_chunk(id: &str, name: Option<&str>, args: &str) -> StreamChunk {
        StreamChunk::tool_call(ToolCallFragment::new(id, name, Some(args)))
    }

    #[test]
    fn accumulates_text_and_forwards_payload_only() {
        let mut round = RoundState::new(1);
        assert!(round.absorb(StreamChunk::content("Bon")).is_some());
        assert!(round.absorb(StreamChunk::reasoning("thinking")).is_some());
        assert!(round.absorb(StreamChunk::content("jour")).is_some());
        assert!(round.absorb(StreamChunk::finish(FinishReason::Stop)).is_none());

        let outcome = round.finish();
        assert_eq!(outcome.text, "Bonjour");
        assert_eq!(outcome.reasoning, "thinking");
        assert_eq!(outcome.signal, TerminalSignal::Stop);
        assert!(!outcome.unrecognized);
    }

    #[test]
    fn tool_calls_round_collects_sealed_calls() {
        let mut round = RoundState::new(1);
        round.absorb(tool_chunk("c1", Some("get_weather"), "{\"city\":"));
        round.absorb(tool_chunk("c1", None, "\"Paris\"}"));
        round.absorb(StreamChunk::finish(FinishReason::ToolCalls));

        let outcome = round.finish();
        assert_eq!(outcome.signal, TerminalSignal::ToolCalls);
        assert_eq!(
            outcome.tool_calls,
            vec![ToolCall::new("c1", "get_weather", "{\"city\":\"Paris\"}")]
        );
        assert_eq!(outcome.reported_finish_reason(), FinishReason::ToolCalls);
    }

    #[test]
    fn late_fragments_are_not_forwarded() {
        let mut round = RoundState::new(1);
        round.absorb(tool_chunk("c1", Some("ping"), "{}"));
        round.absorb(StreamChunk::finish(FinishReason::ToolCalls));
        assert!(round.absorb(tool_chunk("c2", Some("pong"), "{}")).is_none());
        assert_eq!(round.finish().tool_calls.len(), 1);
    }

    #[test]
    fn first_finish_reason_wins() {
        let mut round = RoundState::new(1);
        round.absorb(StreamChunk::finish(FinishReason::Length));
        round.absorb(StreamChunk::finish(FinishReason::Stop));
        assert_eq!(round.terminal_signal(), TerminalSignal::Length);
    }

    #[test]
    fn missing_signal_without_calls_falls_back_to_stop() {
        let mut round = RoundState::new(3);
        round.absorb(StreamChunk::content("partial"));
        let outcome = round.finish();
        assert_eq!(outcome.signal, TerminalSignal::Stop);
        assert!(outcome.unrecognized);
    }

    #[test]
    fn unknown_signal_with_calls_executes_them() {
        let mut round = RoundState::new(1);
        round.absorb(tool_chunk("c1", Some("ping"), "{}"));
        round.absorb(StreamChunk::finish(FinishReason::Unknown));
        let outcome = round.finish();
        assert_eq!(outcome.signal, TerminalSignal::ToolCalls);
        assert!(outcome.unrecognized);
    }

    #[test]
    fn tool_calls_signal_without_calls_is_a_stop() {
        let mut round = RoundState::new(1);
        round.absorb(StreamChunk::finish(FinishReason::ToolCalls));
        let outcome = round.finish();
        assert_eq!(outcome.signal, TerminalSignal::Stop);
        assert!(outcome.unrecognized);
        assert!(outcome.tool_calls.is_empty());
    }

    #[test]
    fn stop_with_calls_ignores_the_calls() {
        let mut round = RoundState::new(1);
        round.absorb(tool_chunk("c1", Some("ping"), "{}"));
        round.absorb(StreamChunk::finish(FinishReason::Stop));
        let outcome = round.finish();
        assert_eq!(outcome.signal, TerminalSignal::Stop);
        assert!(outcome.tool_calls.is_empty());
    }
}
