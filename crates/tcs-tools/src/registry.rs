use crate::error::ToolError;
use crate::schema::{CallId, ToolSchema};
use async_trait::async_trait;
use fuzzy_matcher::{FuzzyMatcher, skim::SkimMatcherV2};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Confirmation details an invocation offers the scheduler before executing.
///
/// Tagged by `kind`, one variant per confirmation shape a tool can ask for.
#[derive(Debug, Clone)]
pub enum ConfirmationDetails {
    Edit {
        file_path: String,
        proposed_content: String,
    },
    Exec {
        command: String,
        root_commands: Vec<String>,
    },
    Mcp {
        server_name: String,
        tool_display_name: String,
    },
    Info {
        title: String,
        description: String,
    },
}

impl ConfirmationDetails {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfirmationDetails::Edit { .. } => "edit",
            ConfirmationDetails::Exec { .. } => "exec",
            ConfirmationDetails::Mcp { .. } => "mcp",
            ConfirmationDetails::Info { .. } => "info",
        }
    }
}

/// Outcome of a successful, non-cancelled invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub parts: Vec<Value>,
    pub display_text: String,
}

/// Callbacks the `Executor` hands to a running invocation so it can report
/// live progress without the invocation needing to know about the
/// `StateStore`.
pub struct ExecCallbacks<'a> {
    pub on_output: &'a (dyn Fn(&str) + Send + Sync),
    pub on_pid: &'a (dyn Fn(u32) + Send + Sync),
}

/// A tool's bound, validated, ready-to-execute handle, produced by
/// [`Tool::build`]. Rebuilt whenever a call's args change.
#[async_trait]
pub trait Invocation: Send + Sync {
    /// Returns confirmation details if the invocation wants user approval
    /// before running, or `None` to short-circuit straight to `ProceedOnce`.
    async fn should_confirm_execute(
        &self,
        cancel: &CancellationToken,
    ) -> Option<ConfirmationDetails>;

    /// Run the bound invocation to completion. Implementations must observe
    /// `cancel` promptly and return `Err(ToolError::Cancelled(_))` rather than
    /// leaving the scheduler to infer cancellation from a generic failure.
    async fn execute(
        &self,
        cancel: CancellationToken,
        callbacks: ExecCallbacks<'_>,
    ) -> Result<InvocationOutcome, ToolError>;

    /// Produce updated args reflecting `new_content` in place of whatever
    /// triggered this invocation's `ConfirmationDetails::Edit`. The scheduler
    /// never inspects or constructs tool args itself; it only delegates
    /// here. Default: not editable.
    fn apply_edit(&self, _new_content: &str) -> Option<Value> {
        None
    }
}

/// A tool as advertised by the registry.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;
    fn schema(&self) -> ToolSchema;

    /// `Some(server_name)` when this tool was discovered via MCP; `None` for
    /// built-in tools.
    fn server_name(&self) -> Option<&str> {
        None
    }

    /// Validate and bind `args`, producing an [`Invocation`]. A returned
    /// `Err` becomes an `INVALID_TOOL_PARAMS` terminal error.
    fn build(&self, args: Value) -> Result<Box<dyn Invocation>, ToolError>;
}

/// External collaborator exposing tool lookup and the full registered-name set.
pub trait ToolRegistry: Send + Sync {
    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>>;
    fn all_tool_names(&self) -> Vec<String>;

    /// Nearest-name match over the registry's name set, used to annotate a
    /// `TOOL_NOT_REGISTERED` error with a suggestion.
    fn suggest(&self, name: &str) -> Option<String> {
        let matcher = SkimMatcherV2::default();
        self.all_tool_names()
            .into_iter()
            .filter_map(|candidate| {
                matcher
                    .fuzzy_match(&candidate, name)
                    .map(|score| (score, candidate))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, candidate)| candidate)
    }
}

/// A plain `HashMap`-backed registry, suitable for embedders and tests.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: std::collections::HashMap<String, Arc<dyn Tool>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn all_tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

/// Helper retained for symmetry with the scheduler's `CallId` — the registry
/// never uses it, but tool authors building synthetic calls in tests do.
pub fn new_call_id(id: impl Into<String>) -> CallId {
    CallId::new(id)
}
