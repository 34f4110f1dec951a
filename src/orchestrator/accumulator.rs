//! Merges streamed tool-call fragments into complete calls.

use std::collections::HashMap;

use tracing::warn;

use crate::types::{ToolCall, ToolCallFragment};

/// Insertion-ordered accumulator for one round's tool calls.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
    by_id: HashMap<String, usize>,
    sealed: bool,
    dropped: usize,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. Returns `false` when the fragment was dropped.
    ///
    /// Arguments are appended, never replaced. The name is replaced only by a
    /// non-empty value.
    pub fn ingest(&mut self, fragment: &ToolCallFragment) -> bool {
        if self.sealed {
            self.dropped += 1;
            warn!(
                tool_call_id = %fragment.id,
                "dropping tool-call fragment received after the round was sealed"
            );
            return false;
        }
        if fragment.id.is_empty() {
            self.dropped += 1;
            warn!("dropping tool-call fragment without an id");
            return false;
        }

        let index = match self.by_id.get(&fragment.id) {
            Some(index) => *index,
            None => {
                self.calls.push(ToolCall::new(fragment.id.clone(), "", ""));
                self.by_id.insert(fragment.id.clone(), self.calls.len() - 1);
                self.calls.len() - 1
            }
        };
        let call = &mut self.calls[index];
        if let Some(name) = fragment.function_name.as_deref().filter(|n| !n.is_empty()) {
            call.function_name = name.to_string();
        }
        if let Some(arguments) = fragment.arguments_json.as_deref() {
            call.arguments_json.push_str(arguments);
        }
        true
    }

    /// Freeze the accumulator and return its calls in first-seen order.
    pub fn seal(&mut self) -> &[ToolCall] {
        self.sealed = true;
        &self.calls
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Number of fragments rejected so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }
}
