//! Table-driven coverage of every "proceed" `ConfirmationOutcome` variant
//! against the same confirmation-requiring call.

mod common;

use common::{AbandonEditor, FixedPolicy, ScriptedTool, registry_with};
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;
use tcs_core::bus::{BusMessage, ConfirmationResponse, InMemoryBus, MessageBus};
use tcs_core::policy::PolicyDecision;
use tcs_core::telemetry::NullTelemetrySink;
use tcs_core::{ConfirmationOutcome, Scheduler, SchedulerConfig, ToolCallState};
use tcs_tools::{CallId, ToolCall};
use tokio_util::sync::CancellationToken;

async fn auto_respond_once(bus: Arc<InMemoryBus>, outcome: ConfirmationOutcome) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if let BusMessage::ToolConfirmationRequest { correlation_id, .. } = msg {
                bus.publish(BusMessage::ToolConfirmationResponse(ConfirmationResponse {
                    correlation_id,
                    confirmed: true,
                    outcome: Some(outcome),
                    payload: None,
                }));
                break;
            }
        }
    });
    tokio::task::yield_now().await;
}

#[rstest]
#[case::proceed_once(ConfirmationOutcome::ProceedOnce)]
#[case::proceed_always(ConfirmationOutcome::ProceedAlways)]
#[case::proceed_always_tool(ConfirmationOutcome::ProceedAlwaysTool)]
#[case::proceed_always_server(ConfirmationOutcome::ProceedAlwaysServer)]
#[case::proceed_always_and_save(ConfirmationOutcome::ProceedAlwaysAndSave)]
#[tokio::test]
async fn every_proceed_outcome_runs_the_tool(#[case] outcome: ConfirmationOutcome) {
    let bus = Arc::new(InMemoryBus::default());
    let tool = ScriptedTool::new("edit").requiring_confirmation();
    let execute_calls = Arc::clone(&tool.execute_calls);
    let scheduler = Scheduler::new(
        registry_with(vec![tool]),
        Arc::new(FixedPolicy(PolicyDecision::AskUser)),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        Arc::new(NullTelemetrySink),
        Arc::new(SchedulerConfig::default()),
        Arc::new(AbandonEditor),
    );

    auto_respond_once(Arc::clone(&bus), outcome).await;

    let completed = scheduler
        .schedule(
            vec![ToolCall { call_id: CallId::new("1"), name: "edit".to_string(), args: json!({"path": "a.txt"}) }],
            CancellationToken::new(),
        )
        .await
        .expect("schedule");

    assert_eq!(completed.len(), 1);
    assert!(matches!(completed[0], ToolCallState::Success { .. }), "{outcome:?} should run the tool");
    assert_eq!(execute_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
