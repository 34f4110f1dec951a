//! Tool trait and closure-based tool wrapper.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::arguments::ToolArguments;
use super::types::{ToolParameters, ToolSpec};
use crate::error::CarnetError;

/// Caller identity forwarded to tool handlers.
///
/// Token validation happens before a session starts; handlers only receive
/// the already-authenticated identity.
#[derive(Clone, Default)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub bearer_token: Option<String>,
}

impl AuthContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            bearer_token: None,
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("user_id", &self.user_id)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Context available during tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub session_id: Option<Uuid>,
    pub tool_call_id: Option<String>,
    pub auth: AuthContext,
    /// Check arguments against the tool schema before the handler runs.
    pub validate_arguments: bool,
}

impl Default for ToolExecutionContext {
    fn default() -> Self {
        Self {
            session_id: None,
            tool_call_id: None,
            auth: AuthContext::default(),
            validate_arguments: true,
        }
    }
}

/// Core tool trait. Implement to expose a locally executed tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &ToolParameters;

    /// Execute the tool with parsed arguments.
    ///
    /// Structured values are serialized before they reach the conversation.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, CarnetError>;

    /// Spec advertised to the model.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, CarnetError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct FnTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create a tool from an async closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, CarnetError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, CarnetError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_context_debug_hides_token() {
        let auth = AuthContext {
            user_id: Some("u-1".into()),
            bearer_token: Some("secret".into()),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("u-1"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn fn_tool_passes_context_to_handler() {
        let tool = FnTool::new(
            "whoami",
            "Return the caller id",
            ToolParameters::empty(),
            |_args, ctx| async move { Ok(serde_json::json!(ctx.auth.user_id)) },
        );
        let ctx = ToolExecutionContext {
            auth: AuthContext::for_user("alice"),
            ..Default::default()
        };
        let out = tool
            .execute(&ToolArguments::new(serde_json::json!({})), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "alice");
        assert_eq!(tool.spec().name, "whoami");
    }
}
