//! Property tests: every batch completes with terminal states matching the
//! submitted call ids, a DENY policy never reaches the executor, and batches
//! submitted earlier to the same scheduler complete no later than later ones.

mod common;

use common::{FixedPolicy, ScriptedTool, registry_with};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tcs_core::bus::{InMemoryBus, MessageBus};
use tcs_core::policy::PolicyDecision;
use tcs_core::telemetry::NullTelemetrySink;
use tcs_core::{Scheduler, SchedulerConfig, ToolCallState};
use tcs_tools::{CallId, ToolCall};
use tokio_util::sync::CancellationToken;

const TOOL_NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

fn scheduler_with(policy: PolicyDecision) -> Scheduler {
    let tools = TOOL_NAMES.iter().map(|name| ScriptedTool::new(*name)).collect();
    let bus = Arc::new(InMemoryBus::default());
    Scheduler::new(
        registry_with(tools),
        Arc::new(FixedPolicy(policy)),
        bus as Arc<dyn MessageBus>,
        Arc::new(NullTelemetrySink),
        Arc::new(SchedulerConfig::default()),
        Arc::new(common::AbandonEditor),
    )
}

fn batch_of(names: &[String]) -> Vec<ToolCall> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| ToolCall {
            call_id: CallId::new(i.to_string()),
            name: name.clone(),
            args: json!({}),
        })
        .collect()
}

/// A name drawn from either the registered pool or a handful of unknown
/// names, so batches mix successes with `TOOL_NOT_REGISTERED` errors.
fn tool_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("alpha".to_string()),
        Just("beta".to_string()),
        Just("gamma".to_string()),
        Just("unknown_tool".to_string()),
    ]
}

proptest! {
    /// Every call in a finite batch ends in exactly one terminal state, and the
    /// completed set exactly matches the submitted call ids.
    #[test]
    fn batch_always_completes_with_terminal_states(names in prop::collection::vec(tool_name_strategy(), 1..6)) {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let scheduler = scheduler_with(PolicyDecision::Allow);
        let requests = batch_of(&names);
        let expected_ids: Vec<String> = requests.iter().map(|r| r.call_id.as_str().to_string()).collect();

        let completed = rt.block_on(scheduler.schedule(requests, CancellationToken::new())).expect("schedule");

        prop_assert_eq!(completed.len(), names.len());
        let mut seen_ids: Vec<String> = completed.iter().map(|c| c.call_id().as_str().to_string()).collect();
        seen_ids.sort();
        let mut expected_sorted = expected_ids;
        expected_sorted.sort();
        prop_assert_eq!(seen_ids, expected_sorted);

        for call in &completed {
            prop_assert!(call.is_terminal(), "call {:?} did not reach a terminal state", call);
            let is_known_terminal_variant = matches!(
                call,
                ToolCallState::Success { .. } | ToolCallState::Error { .. } | ToolCallState::Cancelled { .. }
            );
            prop_assert!(is_known_terminal_variant);
        }
    }

    /// For every call whose first policy decision is DENY, the executor is
    /// never invoked.
    #[test]
    fn deny_policy_never_executes(names in prop::collection::vec(tool_name_strategy(), 1..6)) {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let tools: Vec<ScriptedTool> = TOOL_NAMES.iter().map(|name| ScriptedTool::new(*name)).collect();
        let execute_calls: Vec<_> = tools.iter().map(|t| Arc::clone(&t.execute_calls)).collect();
        let bus = Arc::new(InMemoryBus::default());
        let scheduler = Scheduler::new(
            registry_with(tools),
            Arc::new(FixedPolicy(PolicyDecision::Deny)),
            bus as Arc<dyn MessageBus>,
            Arc::new(NullTelemetrySink),
            Arc::new(SchedulerConfig::default()),
            Arc::new(common::AbandonEditor),
        );

        let completed = rt.block_on(scheduler.schedule(batch_of(&names), CancellationToken::new())).expect("schedule");

        prop_assert_eq!(completed.len(), names.len());
        for calls in &execute_calls {
            prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
        }
    }

    /// Batches submitted s1 < s2 to the same scheduler resolve no later in
    /// that order — s1's completion is observed before s2's.
    #[test]
    fn fifo_holds_across_n_batches(batch_count in 2..5usize) {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let scheduler = Arc::new(scheduler_with(PolicyDecision::Allow));

        rt.block_on(async {
            let futures = (0..batch_count).map(|i| {
                let scheduler = Arc::clone(&scheduler);
                let request = ToolCall {
                    call_id: CallId::new(i.to_string()),
                    name: "alpha".to_string(),
                    args: json!({}),
                };
                async move { scheduler.schedule(vec![request], CancellationToken::new()).await }
            });
            let results = futures::future::join_all(futures).await;
            for (i, result) in results.into_iter().enumerate() {
                let completed = result.expect("schedule");
                prop_assert_eq!(completed[0].call_id().as_str(), i.to_string());
            }
            Ok(())
        })?;
    }
}
