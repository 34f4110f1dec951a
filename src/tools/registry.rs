//! Per-session tool registry and the executor interface the router dispatches to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::ToolSpec;
use super::validation::validate_arguments;
use crate::types::message::parse_arguments;

/// Result of running one tool through an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    /// Handler output, or a failure description.
    pub content: serde_json::Value,
}

impl ToolOutcome {
    pub fn success(content: serde_json::Value) -> Self {
        Self {
            success: true,
            content,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: serde_json::Value::String(message.into()),
        }
    }
}

/// Executes locally handled tools by name.
///
/// Implementations report every failure through [`ToolOutcome`]; they never
/// abort the session.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        arguments_json: &str,
        ctx: &ToolExecutionContext,
    ) -> ToolOutcome;
}

/// Immutable snapshot of the tools available to one session.
///
/// Local tools carry a handler. External tools are only advertised to the
/// model: the backend resolves them itself.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    external: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// A registry with no tools at all.
    pub fn empty() -> Self {
        Self::builder().build()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Names of the tools the model backend executes natively.
    pub fn external_tool_names(&self) -> HashSet<String> {
        self.external.iter().map(|spec| spec.name.clone()).collect()
    }

    /// Every tool offered to the model: local tools in registration order,
    /// then external ones.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .chain(self.external.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len() + self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("local", &self.order)
            .field(
                "external",
                &self.external.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`ToolRegistry`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    external: Vec<ToolSpec>,
}

impl ToolRegistryBuilder {
    /// Register a locally executed tool. A later tool with the same name
    /// replaces the earlier one.
    pub fn tool(self, tool: impl Tool + 'static) -> Self {
        self.shared_tool(Arc::new(tool))
    }

    pub fn shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
        self
    }

    /// Advertise a tool the backend executes natively.
    pub fn external_tool(mut self, spec: ToolSpec) -> Self {
        self.external.retain(|existing| existing.name != spec.name);
        self.external.push(spec);
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            order: self.order,
            external: self.external,
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(
        &self,
        name: &str,
        arguments_json: &str,
        ctx: &ToolExecutionContext,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.get(name).cloned() else {
            return ToolOutcome::failure(format!("unknown tool '{name}'"));
        };
        let args = match parse_arguments(arguments_json) {
            Ok(args) => args,
            Err(err) => {
                return ToolOutcome::failure(format!("invalid JSON arguments for '{name}': {err}"))
            }
        };
        if ctx.validate_arguments {
            if let Err(violation) = validate_arguments(&args, &tool.parameters().schema) {
                return ToolOutcome::failure(format!("invalid arguments for '{name}': {violation}"));
            }
        }
        run_isolated(tool, ToolArguments::new(args), ctx.clone()).await
    }
}

/// Aborts the wrapped task when dropped, so a canceled or timed-out session
/// does not leave tool work running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run a handler on its own task so a panic becomes a failed outcome.
async fn run_isolated(
    tool: Arc<dyn Tool>,
    args: ToolArguments,
    ctx: ToolExecutionContext,
) -> ToolOutcome {
    let name = tool.name().to_string();
    let mut task = AbortOnDrop(tokio::spawn(async move { tool.execute(&args, &ctx).await }));
    match (&mut task.0).await {
        Ok(Ok(value)) => ToolOutcome::success(value),
        Ok(Err(err)) => ToolOutcome::failure(err.to_string()),
        Err(join_err) if join_err.is_panic() => {
            tracing::error!(tool_name = %name, "tool handler panicked");
            ToolOutcome::failure(format!("tool '{name}' panicked"))
        }
        Err(_) => ToolOutcome::failure(format!("tool '{name}' was aborted")),
    }
}
