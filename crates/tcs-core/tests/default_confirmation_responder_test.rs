//! The default `TOOL_CONFIRMATION_REQUEST` fallback responder.

mod common;

use common::{AbandonEditor, FixedPolicy, ScriptedTool, registry_with};
use serde_json::json;
use std::sync::Arc;
use tcs_core::bus::{InMemoryBus, MessageBus};
use tcs_core::policy::PolicyDecision;
use tcs_core::telemetry::NullTelemetrySink;
use tcs_core::{Scheduler, SchedulerConfig, ToolCallState};
use tcs_tools::{CallId, ToolCall};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn unanswered_request_falls_back_to_not_confirmed() {
    let bus = Arc::new(InMemoryBus::default());
    let tool = ScriptedTool::new("edit").requiring_confirmation();
    let scheduler = Scheduler::new(
        registry_with(vec![tool]),
        Arc::new(FixedPolicy(PolicyDecision::AskUser)),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        Arc::new(NullTelemetrySink),
        Arc::new(SchedulerConfig::default()),
        Arc::new(AbandonEditor),
    );
    let _responder = scheduler.install_default_confirmation_responder();

    let completed = scheduler
        .schedule(
            vec![ToolCall { call_id: CallId::new("1"), name: "edit".to_string(), args: json!({"path": "a.txt"}) }],
            CancellationToken::new(),
        )
        .await
        .expect("schedule");

    assert_eq!(completed.len(), 1);
    assert!(matches!(completed[0], ToolCallState::Cancelled { .. }), "no one answered, so it should read as not confirmed");
}
