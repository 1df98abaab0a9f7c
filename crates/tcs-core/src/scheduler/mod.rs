//! Top-level phase controller: ingestion, the serial processing loop, and
//! single-call policy/confirmation/execution orchestration.

pub mod confirmation;
pub mod executor;
pub mod state_store;

use crate::bus::{BusMessage, MessageBus};
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::modification::{EditorProvider, ModificationHandler};
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::telemetry::{TelemetrySink, ToolCallEvent};
use confirmation::ConfirmationCoordinator;
use executor::Executor;
use state_store::{ConfirmationOutcome, StateStore, ToolCallState};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Instant;
use tcs_tools::registry::{ConfirmationDetails, Invocation, Tool};
use tcs_tools::response::{ErrorType, Response};
use tcs_tools::{CallId, ToolCall, ToolRegistry};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Result of driving the interactive confirmation loop to a conclusion.
enum ConfirmResult {
    Proceed(ConfirmationOutcome, Option<Arc<ConfirmationDetails>>, Arc<dyn Invocation>),
    Cancelled,
    /// The call was already transitioned to a terminal `error` status; the
    /// caller has nothing further to do for it.
    Errored,
}

/// Phase controller owning all four subordinate components exclusively.
/// Serializes batches by acquiring `batch_lock` for the duration of one
/// `schedule()` call — Tokio's mutex grants waiters access in the order they
/// started waiting, which is exactly the FIFO-across-batches ordering this
/// scheduler promises; a batch whose cancellation fires before it is granted
/// the lock simply never acquires it (the lock-acquisition future is
/// dropped), which reads as having been removed from the queue.
pub struct Scheduler {
    registry: Arc<dyn ToolRegistry>,
    policy: Arc<dyn PolicyEngine>,
    bus: Arc<dyn MessageBus>,
    telemetry: Arc<dyn TelemetrySink>,
    config: Arc<SchedulerConfig>,
    editor: Arc<dyn EditorProvider>,
    store: Mutex<StateStore>,
    confirmation: ConfirmationCoordinator,
    modification: ModificationHandler,
    executor: Executor,
    batch_lock: Mutex<()>,
    /// Fires every in-flight call's combined cancellation token when
    /// `cancel_all()` is invoked. Replaced with a fresh token at the start of
    /// the next `schedule()` call once it has fired, so a past `cancel_all()`
    /// does not pre-cancel batches submitted afterward.
    global_cancel: StdMutex<CancellationToken>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        policy: Arc<dyn PolicyEngine>,
        bus: Arc<dyn MessageBus>,
        telemetry: Arc<dyn TelemetrySink>,
        config: Arc<SchedulerConfig>,
        editor: Arc<dyn EditorProvider>,
    ) -> Self {
        let confirmation = ConfirmationCoordinator::new(Arc::clone(&bus));
        let store = Mutex::new(StateStore::new(Arc::clone(&bus)));
        Self {
            registry,
            policy,
            bus,
            telemetry,
            config,
            editor,
            store,
            confirmation,
            modification: ModificationHandler,
            executor: Executor,
            batch_lock: Mutex::new(()),
            global_cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    /// Accepts one batch of requests. If the scheduler is idle the batch
    /// starts immediately; otherwise it waits in FIFO order behind earlier
    /// batches. Returns the terminal state of every call once the whole
    /// batch has finalized. A failure scoped to a single call (an `AskUser`
    /// policy verdict reaching a non-interactive process, or an invalid
    /// state transition — both developer bugs, never ordinary tool-call
    /// outcomes) surfaces as that one call finishing `error` with
    /// `UnhandledException` rather than aborting the batch; `Err` here is
    /// reserved for a batch-wide ingestion failure, such as the caller
    /// submitting duplicate `callId`s in one request list, that has no
    /// single call to attribute it to.
    #[tracing::instrument(skip(self, requests, cancel), fields(batch_len = requests.len()))]
    pub async fn schedule(&self, requests: Vec<ToolCall>, cancel: CancellationToken) -> Result<Vec<ToolCallState>> {
        let _permit = tokio::select! {
            guard = self.batch_lock.lock() => guard,
            () = cancel.cancelled() => {
                tracing::debug!("batch cancelled while queued");
                return Ok(requests
                    .into_iter()
                    .map(|r| ToolCallState::Cancelled {
                        call_id: r.call_id,
                        tool_name: r.name,
                        reason: "Operation cancelled".to_string(),
                        duration_ms: 0,
                    })
                    .collect());
            }
        };

        let mut store = self.store.lock().await;
        store.clear_batch();

        let combined = self.combine_with_global_cancel(&cancel);

        let ingested = self.ingest(&requests);
        for pre_errored in ingested.pre_errored {
            store.push_completed(pre_errored);
        }
        store.enqueue(ingested.validating)?;

        self.run_processing_loop(&mut store, &combined.token).await?;

        Ok(store.get_completed_batch().to_vec())
    }

    /// Cancels every call currently in flight across every `schedule()` call
    /// this scheduler is running, not just one batch's own token. Idempotent;
    /// a later `schedule()` call starts with a fresh token and is unaffected.
    pub fn cancel_all(&self) {
        self.global_cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .cancel();
    }

    /// Merges the scheduler-wide `cancel_all` token with this batch's own
    /// token into one token that fires when either does, so every suspension
    /// point downstream (confirmation wait, editor wait, tool execution)
    /// only has to race a single `CancellationToken` to observe both sources
    /// of cancellation. Refreshes the scheduler-wide token first if a
    /// previous `cancel_all()` call already fired it, so this new batch
    /// doesn't start pre-cancelled.
    fn combine_with_global_cancel(&self, batch_cancel: &CancellationToken) -> CombinedCancel {
        let global = {
            let mut guard = self.global_cancel.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };
        let token = CancellationToken::new();
        if global.is_cancelled() || batch_cancel.is_cancelled() {
            // Either source had already fired before this batch started; the
            // watcher task below would still catch this, but only once the
            // runtime gets around to polling it, and nothing here should
            // depend on scheduling order to see an already-cancelled token.
            token.cancel();
        }
        let watcher_token = token.clone();
        let batch_cancel = batch_cancel.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                () = global.cancelled() => {},
                () = batch_cancel.cancelled() => {},
            }
            watcher_token.cancel();
        });
        CombinedCancel { token, watcher }
    }

    pub async fn get_completed_calls(&self) -> Vec<ToolCallState> {
        self.store.lock().await.get_completed_batch().to_vec()
    }

    /// Default `TOOL_CONFIRMATION_REQUEST` handler: for any correlation id
    /// nobody else answers within the same tick, publish a "not confirmed"
    /// response so a waiter is never left hanging. Its main use is
    /// backstopping tools that query the bus directly rather than through
    /// `ConfirmationCoordinator`, so this is opt-in and not wired up by
    /// `Scheduler::new`; embedders call it once after construction if they
    /// want the fallback.
    pub fn install_default_confirmation_responder(&self) -> tokio::task::JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            let answered: Arc<StdMutex<HashSet<u64>>> = Arc::new(StdMutex::new(HashSet::new()));
            loop {
                match rx.recv().await {
                    Ok(BusMessage::ToolConfirmationResponse(response)) => {
                        answered
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .insert(response.correlation_id);
                    }
                    Ok(BusMessage::ToolConfirmationRequest { correlation_id, .. }) => {
                        let bus = Arc::clone(&bus);
                        let answered = Arc::clone(&answered);
                        tokio::spawn(async move {
                            tokio::task::yield_now().await;
                            let already_answered = answered
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner)
                                .contains(&correlation_id);
                            if !already_answered {
                                bus.publish(BusMessage::ToolConfirmationResponse(crate::bus::ConfirmationResponse {
                                    correlation_id,
                                    confirmed: false,
                                    outcome: None,
                                    payload: None,
                                }));
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Phase 1 — Ingestion & Resolution.
    fn ingest(&self, requests: &[ToolCall]) -> Ingested {
        let mut pre_errored = Vec::new();
        let mut validating = Vec::new();
        for request in requests {
            match self.registry.get_tool(&request.name) {
                None => {
                    let message = match self.registry.suggest(&request.name) {
                        Some(suggestion) => format!(
                            "Tool \"{}\" not found in registry. Did you mean \"{suggestion}\"?",
                            request.name
                        ),
                        None => format!("Tool \"{}\" not found in registry.", request.name),
                    };
                    pre_errored.push(ToolCallState::Error {
                        call_id: request.call_id.clone(),
                        tool_name: request.name.clone(),
                        response: Response::error(request.call_id.clone(), ErrorType::ToolNotRegistered, message, vec![]),
                        duration_ms: 0,
                        error_type: ErrorType::ToolNotRegistered,
                    });
                }
                Some(tool) => match tool.build(request.args.clone()) {
                    Err(err) => {
                        pre_errored.push(ToolCallState::Error {
                            call_id: request.call_id.clone(),
                            tool_name: request.name.clone(),
                            response: Response::error(request.call_id.clone(), ErrorType::InvalidToolParams, err.to_string(), vec![]),
                            duration_ms: 0,
                            error_type: ErrorType::InvalidToolParams,
                        });
                    }
                    Ok(invocation) => {
                        validating.push(ToolCallState::Validating {
                            request: request.clone(),
                            tool,
                            invocation: Arc::from(invocation),
                            start_time: Instant::now(),
                        });
                    }
                },
            }
        }
        Ingested { pre_errored, validating }
    }

    /// Phase 2 — Processing Loop.
    async fn run_processing_loop(&self, store: &mut StateStore, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                store.cancel_all_queued("Operation cancelled");
                if let Some(active) = store.get_first_active_call()
                    && !active.is_terminal()
                {
                    let id = active.call_id().clone();
                    store.to_cancelled(&id, "Operation cancelled")?;
                }
            }

            if store.get_first_active_call().is_none() {
                match store.dequeue() {
                    None => break,
                    Some(call) if call.is_terminal() => {
                        self.finalize_if_terminal(store)?;
                        continue;
                    }
                    Some(_) => {}
                }
            }

            let is_validating = matches!(store.get_first_active_call(), Some(ToolCallState::Validating { .. }));
            if is_validating {
                let Some(active) = store.get_first_active_call() else {
                    continue;
                };
                let call_id = active.call_id().clone();
                if let Err(err) = self.process_single_call(store, call_id.clone(), cancel).await {
                    Self::mark_unhandled_exception(store, &call_id, err)?;
                }
            }

            self.finalize_if_terminal(store)?;
        }
        Ok(())
    }

    /// `process_single_call` normally reports a per-call failure by
    /// transitioning the call itself to a terminal `error` status; this only
    /// fires when it instead propagated a `SchedulerError` scoped to the
    /// call it was processing (an invalid state transition, `updateArgs`
    /// outside `awaiting_approval`, or an `AskUser` verdict reaching a
    /// non-interactive process). Rather than letting that abort every other
    /// call in the batch, mark the one call `error` with
    /// `UnhandledException` and let the loop continue. If the call can't
    /// even be marked terminal — it isn't the active call any more, which
    /// this scheduler's own sequencing should never produce — there is no
    /// narrower scope left to contain the failure, so it is re-raised.
    fn mark_unhandled_exception(store: &mut StateStore, call_id: &CallId, err: SchedulerError) -> Result<()> {
        let response = Response::error(call_id.clone(), ErrorType::UnhandledException, err.to_string(), vec![]);
        store.to_error(call_id, response, ErrorType::UnhandledException).map_err(|_| err)
    }

    fn finalize_if_terminal(&self, store: &mut StateStore) -> Result<()> {
        let Some(active) = store.get_first_active_call() else {
            return Ok(());
        };
        if !active.is_terminal() {
            return Ok(());
        }
        let id = active.call_id().clone();
        let outcome = store.get_outcome(&id);
        self.log_telemetry(active, outcome);
        store.finalize_call(&id)
    }

    fn log_telemetry(&self, call: &ToolCallState, outcome: Option<ConfirmationOutcome>) {
        let (status, duration_ms, error_type) = match call {
            ToolCallState::Success { duration_ms, .. } => ("success", *duration_ms, None),
            ToolCallState::Error { duration_ms, error_type, .. } => ("error", *duration_ms, Some(error_type_name(*error_type))),
            ToolCallState::Cancelled { duration_ms, .. } => ("cancelled", *duration_ms, None),
            _ => return,
        };
        self.telemetry.log_tool_call(ToolCallEvent {
            call_id: call.call_id().clone(),
            tool_name: call.tool_name().to_string(),
            status,
            duration_ms,
            outcome: outcome.map(confirmation_outcome_name),
            error_type,
        });
    }

    /// Phase 3 — Single-Call Orchestration, for a `validating` call.
    async fn process_single_call(&self, store: &mut StateStore, call_id: CallId, cancel: &CancellationToken) -> Result<()> {
        let (tool_name, args, tool, invocation) = {
            let Some(ToolCallState::Validating { request, tool, invocation, .. }) = store.get_first_active_call() else {
                return Ok(());
            };
            (request.name.clone(), request.args.clone(), Arc::clone(tool), Arc::clone(invocation))
        };
        let server_name = tool.server_name().map(str::to_string);

        let decision = self
            .policy
            .check(&tool_name, &args, server_name.as_deref(), self.config.is_interactive())
            .await;

        let (outcome, details, invocation) = match decision {
            PolicyDecision::Deny => {
                let response = Response::error(call_id.clone(), ErrorType::PolicyViolation, "Tool execution denied by policy.", vec![]);
                store.to_error(&call_id, response, ErrorType::PolicyViolation)?;
                return Ok(());
            }
            PolicyDecision::Allow => (ConfirmationOutcome::ProceedOnce, None, invocation),
            PolicyDecision::AskUser => {
                if !self.config.is_interactive() {
                    return Err(SchedulerError::AskUserInNonInteractive);
                }
                match self
                    .interactive_confirmation_loop(store, &call_id, tool, invocation, cancel)
                    .await?
                {
                    ConfirmResult::Proceed(outcome, details, invocation) => (outcome, details, invocation),
                    ConfirmResult::Cancelled => {
                        store.to_cancelled(&call_id, "User denied execution.")?;
                        store.cancel_all_queued("User cancelled operation");
                        return Ok(());
                    }
                    ConfirmResult::Errored => return Ok(()),
                }
            }
        };

        self.dispatch_policy_update(&tool_name, details.as_deref(), outcome);

        if cancel.is_cancelled() {
            store.to_cancelled(&call_id, "Operation cancelled")?;
            store.cancel_all_queued("Operation cancelled");
            return Ok(());
        }

        store.set_outcome(&call_id, outcome);
        store.to_scheduled(&call_id, outcome)?;
        store.to_executing(&call_id)?;
        self.executor.execute(&call_id, invocation.as_ref(), cancel.clone(), store).await
    }

    /// Phase 3, step 2 — "Repeat while outcome = ModifyWithEditor."
    async fn interactive_confirmation_loop(
        &self,
        store: &mut StateStore,
        call_id: &CallId,
        tool: Arc<dyn Tool>,
        mut invocation: Arc<dyn Invocation>,
        cancel: &CancellationToken,
    ) -> Result<ConfirmResult> {
        loop {
            let Some(details) = invocation.should_confirm_execute(cancel).await else {
                return Ok(ConfirmResult::Proceed(ConfirmationOutcome::ProceedOnce, None, invocation));
            };
            let details = Arc::new(details);

            self.bus.publish(BusMessage::ToolNotificationHook { details: Arc::clone(&details) });

            let correlation_id = self.confirmation.mint_correlation_id();
            store.to_awaiting_approval(call_id, Arc::clone(&details), correlation_id)?;
            self.bus.publish(BusMessage::ToolConfirmationRequest {
                correlation_id,
                tool_name: tool.name().to_string(),
                details: Arc::clone(&details),
            });

            let Some(response) = self.confirmation.await_confirmation(correlation_id, cancel).await else {
                return Ok(ConfirmResult::Cancelled);
            };

            let Some(outcome) = response.outcome else {
                return Ok(ConfirmResult::Cancelled);
            };

            let new_content = response.payload.as_ref().and_then(|p| p.new_content.clone());

            if outcome == ConfirmationOutcome::ModifyWithEditor {
                let proposed = match details.as_ref() {
                    ConfirmationDetails::Edit { proposed_content, .. } => proposed_content.clone(),
                    _ => String::new(),
                };
                let edited = self
                    .modification
                    .handle_modify_with_editor(invocation.as_ref(), &proposed, self.editor.as_ref(), cancel)
                    .await;
                match edited {
                    Ok(Some(new_args)) => {
                        invocation = match self.rebuild(store, call_id, &tool, new_args).await? {
                            Some(invocation) => invocation,
                            None => return Ok(ConfirmResult::Errored),
                        };
                        continue;
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        let response = Response::error(call_id.clone(), ErrorType::ExecutionFailed, err.to_string(), vec![]);
                        store.to_error(call_id, response, ErrorType::ExecutionFailed)?;
                        return Ok(ConfirmResult::Errored);
                    }
                }
            }

            if let Some(new_content) = new_content {
                if let Some(new_args) = self.modification.apply_inline_modify(invocation.as_ref(), &new_content) {
                    invocation = match self.rebuild(store, call_id, &tool, new_args).await? {
                        Some(invocation) => invocation,
                        None => return Ok(ConfirmResult::Errored),
                    };
                }
                return Ok(ConfirmResult::Proceed(ConfirmationOutcome::ProceedOnce, Some(details), invocation));
            }

            if outcome == ConfirmationOutcome::Cancel {
                return Ok(ConfirmResult::Cancelled);
            }
            return Ok(ConfirmResult::Proceed(outcome, Some(details), invocation));
        }
    }

    /// Rebuilds the tool invocation against new args and transitions the
    /// call back to `validating`. A build failure here becomes an
    /// `INVALID_TOOL_PARAMS` terminal error rather than a contract
    /// violation — the new args came from the user, not the scheduler, and
    /// may simply be bad.
    async fn rebuild(
        &self,
        store: &mut StateStore,
        call_id: &CallId,
        tool: &Arc<dyn Tool>,
        new_args: serde_json::Value,
    ) -> Result<Option<Arc<dyn Invocation>>> {
        match tool.build(new_args.clone()) {
            Ok(invocation) => {
                let invocation: Arc<dyn Invocation> = Arc::from(invocation);
                store.update_args(call_id, new_args, Arc::clone(&invocation))?;
                Ok(Some(invocation))
            }
            Err(err) => {
                let response = Response::error(call_id.clone(), ErrorType::InvalidToolParams, err.to_string(), vec![]);
                store.to_error(call_id, response, ErrorType::InvalidToolParams)?;
                Ok(None)
            }
        }
    }

    /// Publishes an `UpdatePolicy` message for any `ProceedAlways*` outcome,
    /// or flips the scheduler into auto-edit mode for `ProceedAlways` on a
    /// tool in the auto-edit allow-list.
    fn dispatch_policy_update(&self, tool_name: &str, details: Option<&ConfirmationDetails>, outcome: ConfirmationOutcome) {
        use ConfirmationOutcome::{ProceedAlways, ProceedAlwaysAndSave, ProceedAlwaysServer, ProceedAlwaysTool};

        if outcome == ProceedAlways && self.config.allows_auto_edit(tool_name) {
            self.config.set_approval_mode(crate::config::ApprovalMode::AutoEdit);
            return;
        }

        if let Some(ConfirmationDetails::Mcp { server_name, .. }) = details
            && matches!(outcome, ProceedAlways | ProceedAlwaysTool | ProceedAlwaysServer | ProceedAlwaysAndSave)
        {
            let persist = outcome == ProceedAlwaysAndSave;
            let published_tool_name = if outcome == ProceedAlwaysServer {
                format!("{server_name}__*")
            } else {
                tool_name.to_string()
            };
            self.bus.publish(BusMessage::UpdatePolicy {
                tool_name: published_tool_name,
                mcp_name: Some(server_name.clone()),
                persist,
                command_prefix: None,
            });
            return;
        }

        if matches!(outcome, ProceedAlways | ProceedAlwaysAndSave) {
            let command_prefix = match details {
                Some(ConfirmationDetails::Exec { root_commands, .. }) => Some(root_commands.clone()),
                _ => None,
            };
            self.bus.publish(BusMessage::UpdatePolicy {
                tool_name: tool_name.to_string(),
                mcp_name: None,
                persist: outcome == ProceedAlwaysAndSave,
                command_prefix,
            });
        }
    }
}

struct Ingested {
    pre_errored: Vec<ToolCallState>,
    validating: Vec<ToolCallState>,
}

/// A token that fires when either of its two source tokens fires, backed by
/// a watcher task that is aborted once the batch using it is done — whether
/// or not cancellation ever happened.
struct CombinedCancel {
    token: CancellationToken,
    watcher: tokio::task::JoinHandle<()>,
}

impl Drop for CombinedCancel {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

fn error_type_name(error_type: ErrorType) -> &'static str {
    match error_type {
        ErrorType::ToolNotRegistered => "TOOL_NOT_REGISTERED",
        ErrorType::InvalidToolParams => "INVALID_TOOL_PARAMS",
        ErrorType::PolicyViolation => "POLICY_VIOLATION",
        ErrorType::UnhandledException => "UNHANDLED_EXCEPTION",
        ErrorType::ExecutionFailed => "EXECUTION_FAILED",
    }
}

fn confirmation_outcome_name(outcome: ConfirmationOutcome) -> &'static str {
    match outcome {
        ConfirmationOutcome::ProceedOnce => "ProceedOnce",
        ConfirmationOutcome::ProceedAlways => "ProceedAlways",
        ConfirmationOutcome::ProceedAlwaysTool => "ProceedAlwaysTool",
        ConfirmationOutcome::ProceedAlwaysServer => "ProceedAlwaysServer",
        ConfirmationOutcome::ProceedAlwaysAndSave => "ProceedAlwaysAndSave",
        ConfirmationOutcome::ModifyWithEditor => "ModifyWithEditor",
        ConfirmationOutcome::Cancel => "Cancel",
    }
}
