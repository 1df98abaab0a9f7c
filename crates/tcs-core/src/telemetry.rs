use tcs_tools::CallId;

/// One terminal-call event, handed to [`TelemetrySink::log_tool_call`] exactly
/// once per call.
#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    pub call_id: CallId,
    pub tool_name: String,
    pub status: &'static str,
    pub duration_ms: u64,
    pub outcome: Option<&'static str>,
    pub error_type: Option<&'static str>,
}

/// External collaborator the scheduler fires one event into per terminal
/// call; the scheduler never reads it back.
pub trait TelemetrySink: Send + Sync {
    fn log_tool_call(&self, event: ToolCallEvent);
}

/// No-op sink for embedders that don't care, and the scheduler's own tests.
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn log_tool_call(&self, event: ToolCallEvent) {
        tracing::debug!(
            call_id = %event.call_id,
            tool = %event.tool_name,
            status = event.status,
            duration_ms = event.duration_ms,
            "tool call telemetry (discarded by NullTelemetrySink)"
        );
    }
}
