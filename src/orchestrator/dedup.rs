//! Audit-only detection of repeated tool invocations.

use std::collections::HashSet;

use crate::types::ToolCall;

/// Remembers every (function name, argument string) pair seen in one request.
///
/// Arguments are compared byte for byte: reordered but equivalent JSON is a
/// different fingerprint. Detection never blocks execution.
#[derive(Debug, Default)]
pub struct DuplicateCallDetector {
    fingerprints: HashSet<(String, String)>,
    duplicates: usize,
}

impl DuplicateCallDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, function_name: &str, arguments_json: &str) -> bool {
        self.fingerprints
            .contains(&(function_name.to_string(), arguments_json.to_string()))
    }

    pub fn record(&mut self, function_name: &str, arguments_json: &str) {
        self.fingerprints
            .insert((function_name.to_string(), arguments_json.to_string()));
    }

    /// Check and record in one step. Returns `true` for a repeat.
    pub fn observe(&mut self, call: &ToolCall) -> bool {
        let fresh = self
            .fingerprints
            .insert((call.function_name.clone(), call.arguments_json.clone()));
        if !fresh {
            self.duplicates += 1;
        }
        !fresh
    }

    /// Repeats observed so far.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
