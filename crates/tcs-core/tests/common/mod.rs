use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tcs_core::modification::EditorProvider;
use tcs_core::policy::{PolicyDecision, PolicyEngine};
use tcs_core::telemetry::{TelemetrySink, ToolCallEvent};
use tcs_tools::registry::{ConfirmationDetails, ExecCallbacks, Invocation, InvocationOutcome, Tool};
use tcs_tools::{InMemoryToolRegistry, ToolError, ToolSchema};
use tokio_util::sync::CancellationToken;

/// A tool whose behavior is fixed at registration time: always succeeds,
/// always denies confirmation, or requires confirmation before running.
pub struct ScriptedTool {
    pub name: String,
    pub requires_confirmation: bool,
    pub server_name: Option<String>,
    pub execute_calls: Arc<AtomicUsize>,
}

impl ScriptedTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_confirmation: false,
            server_name: None,
            execute_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            display_name: self.name.clone(),
            description: String::new(),
            input_schema: tcs_tools::InputSchema::new(json!({})),
        }
    }

    fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    fn build(&self, args: Value) -> Result<Box<dyn Invocation>, ToolError> {
        Ok(Box::new(ScriptedInvocation {
            args,
            requires_confirmation: self.requires_confirmation,
            execute_calls: Arc::clone(&self.execute_calls),
        }))
    }
}

struct ScriptedInvocation {
    args: Value,
    requires_confirmation: bool,
    execute_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Invocation for ScriptedInvocation {
    async fn should_confirm_execute(&self, _cancel: &CancellationToken) -> Option<ConfirmationDetails> {
        if self.requires_confirmation {
            Some(ConfirmationDetails::Edit {
                file_path: "scripted.txt".to_string(),
                proposed_content: self.args.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
        } else {
            None
        }
    }

    async fn execute(&self, cancel: CancellationToken, callbacks: ExecCallbacks<'_>) -> Result<InvocationOutcome, ToolError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled("scripted".to_string()));
        }
        (callbacks.on_output)("ok");
        Ok(InvocationOutcome {
            parts: vec![self.args.clone()],
            display_text: "done".to_string(),
        })
    }

    fn apply_edit(&self, new_content: &str) -> Option<Value> {
        Some(json!({"content": new_content}))
    }
}

pub fn registry_with(tools: Vec<ScriptedTool>) -> Arc<InMemoryToolRegistry> {
    let mut registry = InMemoryToolRegistry::new();
    for tool in tools {
        registry.register(Arc::new(tool));
    }
    Arc::new(registry)
}

/// Policy engine returning a fixed decision for every call, regardless of
/// tool name.
pub struct FixedPolicy(pub PolicyDecision);

#[async_trait]
impl PolicyEngine for FixedPolicy {
    async fn check(&self, _tool_name: &str, _args: &Value, _server_name: Option<&str>, _interactive: bool) -> PolicyDecision {
        self.0
    }
}

/// Captures every telemetry event handed to it, for tests asserting on
/// status/outcome/error_type rather than discarding them like
/// `NullTelemetrySink`.
#[derive(Default)]
pub struct RecordingTelemetrySink {
    pub events: Arc<StdMutex<Vec<ToolCallEvent>>>,
}

impl TelemetrySink for RecordingTelemetrySink {
    fn log_tool_call(&self, event: ToolCallEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

/// Always reports the edit as abandoned, for tests that don't exercise the
/// external-editor flow.
pub struct AbandonEditor;

#[async_trait]
impl EditorProvider for AbandonEditor {
    async fn edit(&self, _proposed_content: &str, _cancel: &CancellationToken) -> std::io::Result<Option<String>> {
        Ok(None)
    }
}
