//! Local/external classification and dispatch of completed tool calls.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::tools::{ToolExecutionContext, ToolExecutor, ToolOutcome};
use crate::types::{ExecutedToolResult, ToolCall};

/// Where a tool call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRoute {
    /// Resolved by the model backend itself. Never dispatched here.
    External,
    /// Dispatched to the session's executor.
    Local,
}

/// Set-membership check against the external tool names of the session.
pub fn classify(call: &ToolCall, external_tool_names: &HashSet<String>) -> ToolRoute {
    if external_tool_names.contains(&call.function_name) {
        ToolRoute::External
    } else {
        ToolRoute::Local
    }
}

/// Routes one session's tool calls.
pub struct ToolRouter {
    executor: Arc<dyn ToolExecutor>,
    external_tool_names: HashSet<String>,
    error_prefix: String,
}

impl ToolRouter {
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        external_tool_names: HashSet<String>,
        error_prefix: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            external_tool_names,
            error_prefix: error_prefix.into(),
        }
    }

    pub fn route(&self, call: &ToolCall) -> ToolRoute {
        classify(call, &self.external_tool_names)
    }

    /// Run a local call. Failures come back as a failed result, never as an
    /// error.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolExecutionContext) -> ExecutedToolResult {
        debug!(
            tool_name = %call.function_name,
            tool_call_id = %call.id,
            "dispatching tool call"
        );
        let outcome = self
            .executor
            .execute(&call.function_name, &call.arguments_json, ctx)
            .await;
        self.to_result(call, outcome)
    }

    fn to_result(&self, call: &ToolCall, outcome: ToolOutcome) -> ExecutedToolResult {
        let rendered = match outcome.content {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        };
        let content = if outcome.success {
            rendered
        } else {
            format!("{}{rendered}", self.error_prefix)
        };
        ExecutedToolResult {
            tool_call_id: call.id.clone(),
            name: call.function_name.clone(),
            content,
            succeeded: outcome.success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Canned(ToolOutcome);

    #[async_trait]
    impl ToolExecutor for Canned {
        async fn execute(&self, _name: &str, _args: &str, _ctx: &ToolExecutionContext) -> ToolOutcome {
            self.0.clone()
        }
    }

    fn router(outcome: ToolOutcome) -> ToolRouter {
        ToolRouter::new(
            Arc::new(Canned(outcome)),
            HashSet::from(["web_search".to_string()]),
            "Erreur: ",
        )
    }

    #[test]
    fn classifies_by_external_name_set() {
        let external = HashSet::from(["web_search".to_string()]);
        assert_eq!(
            classify(&ToolCall::new("c1", "web_search", "{}"), &external),
            ToolRoute::External
        );
        assert_eq!(
            classify(&ToolCall::new("c2", "get_weather", "{}"), &external),
            ToolRoute::Local
        );
        assert_eq!(
            classify(&ToolCall::new("c3", "web_search", "{}"), &HashSet::new()),
            ToolRoute::Local
        );
    }

    #[tokio::test]
    async fn string_content_is_kept_verbatim() {
        let result = router(ToolOutcome::success(serde_json::json!("18°C")))
            .dispatch(
                &ToolCall::new("c1", "get_weather", r#"{"city":"Paris"}"#),
                &ToolExecutionContext::default(),
            )
            .await;
        assert_eq!(
            result,
            ExecutedToolResult {
                tool_call_id: "c1".into(),
                name: "get_weather".into(),
                content: "18°C".into(),
                succeeded: true,
            }
        );
    }

    #[tokio::test]
    async fn structured_content_is_serialized() {
        let result = router(ToolOutcome::success(serde_json::json!({"temp": 18})))
            .dispatch(&ToolCall::new("c1", "get_weather", "{}"), &ToolExecutionContext::default())
            .await;
        assert_eq!(result.content, r#"{"temp":18}"#);
    }

    #[tokio::test]
    async fn failures_carry_the_error_prefix() {
        let result = router(ToolOutcome::failure("division by zero"))
            .dispatch(&ToolCall::new("c1", "divide", "{}"), &ToolExecutionContext::default())
            .await;
        assert!(!result.succeeded);
        assert_eq!(result.content, "Erreur: division by zero");
    }
}
