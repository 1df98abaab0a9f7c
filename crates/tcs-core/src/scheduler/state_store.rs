use crate::bus::{BusMessage, MessageBus};
use crate::error::{Result, SchedulerError};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tcs_tools::registry::{ConfirmationDetails, Invocation};
use tcs_tools::response::{ErrorType, Response};
use tcs_tools::{CallId, Tool, ToolCall};

/// The user's verdict on a pending tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    ProceedOnce,
    ProceedAlways,
    ProceedAlwaysTool,
    ProceedAlwaysServer,
    ProceedAlwaysAndSave,
    ModifyWithEditor,
    Cancel,
}

/// Recorded confirmation outcome, kept around for telemetry after the call
/// reaches a terminal status.
pub type CallOutcome = ConfirmationOutcome;

/// A single in-flight (or finalized) tool call and its status. Each variant
/// carries exactly the fields legal in that state;
/// there is no way to construct, say, an `Executing` call without a `pid`
/// slot or to read `response` off a `Validating` one.
#[derive(Clone)]
pub enum ToolCallState {
    Validating {
        request: ToolCall,
        tool: Arc<dyn Tool>,
        invocation: Arc<dyn Invocation>,
        start_time: Instant,
    },
    Scheduled {
        request: ToolCall,
        tool: Arc<dyn Tool>,
        invocation: Arc<dyn Invocation>,
        start_time: Instant,
        outcome: ConfirmationOutcome,
    },
    AwaitingApproval {
        request: ToolCall,
        tool: Arc<dyn Tool>,
        invocation: Arc<dyn Invocation>,
        start_time: Instant,
        details: Arc<ConfirmationDetails>,
        correlation_id: u64,
    },
    Executing {
        request: ToolCall,
        tool: Arc<dyn Tool>,
        invocation: Arc<dyn Invocation>,
        start_time: Instant,
        outcome: ConfirmationOutcome,
        live_output: Option<String>,
        pid: Option<u32>,
    },
    Success {
        call_id: CallId,
        tool_name: String,
        response: Response,
        duration_ms: u64,
    },
    Error {
        call_id: CallId,
        tool_name: String,
        response: Response,
        duration_ms: u64,
        error_type: ErrorType,
    },
    Cancelled {
        call_id: CallId,
        tool_name: String,
        reason: String,
        duration_ms: u64,
    },
}

impl fmt::Debug for ToolCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.status_name())
            .field("call_id", self.call_id())
            .field("tool_name", &self.tool_name())
            .finish_non_exhaustive()
    }
}

impl ToolCallState {
    pub fn call_id(&self) -> &CallId {
        match self {
            ToolCallState::Validating { request, .. }
            | ToolCallState::Scheduled { request, .. }
            | ToolCallState::AwaitingApproval { request, .. }
            | ToolCallState::Executing { request, .. } => &request.call_id,
            ToolCallState::Success { call_id, .. }
            | ToolCallState::Error { call_id, .. }
            | ToolCallState::Cancelled { call_id, .. } => call_id,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            ToolCallState::Validating { request, .. }
            | ToolCallState::Scheduled { request, .. }
            | ToolCallState::AwaitingApproval { request, .. }
            | ToolCallState::Executing { request, .. } => &request.name,
            ToolCallState::Success { tool_name, .. }
            | ToolCallState::Error { tool_name, .. }
            | ToolCallState::Cancelled { tool_name, .. } => tool_name,
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self {
            ToolCallState::Validating { .. } => "validating",
            ToolCallState::Scheduled { .. } => "scheduled",
            ToolCallState::AwaitingApproval { .. } => "awaiting_approval",
            ToolCallState::Executing { .. } => "executing",
            ToolCallState::Success { .. } => "success",
            ToolCallState::Error { .. } => "error",
            ToolCallState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallState::Success { .. } | ToolCallState::Error { .. } | ToolCallState::Cancelled { .. }
        )
    }

    pub fn start_time(&self) -> Option<Instant> {
        match self {
            ToolCallState::Validating { start_time, .. }
            | ToolCallState::Scheduled { start_time, .. }
            | ToolCallState::AwaitingApproval { start_time, .. }
            | ToolCallState::Executing { start_time, .. } => Some(*start_time),
            _ => None,
        }
    }
}

/// Authoritative record of the active batch. Owned exclusively by the
/// `Scheduler`; all mutation funnels through these methods, each of which
/// publishes a `TOOL_STATE_UPDATE` snapshot.
pub struct StateStore {
    queue: VecDeque<ToolCallState>,
    active: Option<ToolCallState>,
    completed: Vec<ToolCallState>,
    bus: Arc<dyn MessageBus>,
    /// Confirmation outcome recorded per call, independent of whichever
    /// terminal variant the call eventually lands in, so telemetry can read
    /// it back after the call has already become `success`/`error`/
    /// `cancelled`.
    outcomes: HashMap<CallId, ConfirmationOutcome>,
}

impl StateStore {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            queue: VecDeque::new(),
            active: None,
            completed: Vec::new(),
            bus,
            outcomes: HashMap::new(),
        }
    }

    fn emit(&self) {
        let mut batch: Vec<ToolCallState> = Vec::with_capacity(self.queue.len() + 1);
        if let Some(active) = &self.active {
            batch.push(active.clone());
        }
        batch.extend(self.queue.iter().cloned());
        self.bus.publish(BusMessage::ToolStateUpdate { batch });
    }

    /// Discards any completed batch and resets the queue.
    pub fn clear_batch(&mut self) {
        self.completed.clear();
        self.queue.clear();
        self.active = None;
        self.outcomes.clear();
        self.emit();
    }

    /// Appends ingested calls. Duplicate `callId`s are a programmer error.
    pub fn enqueue(&mut self, calls: Vec<ToolCallState>) -> Result<()> {
        for call in &calls {
            let id = call.call_id();
            let dup = self.active.as_ref().is_some_and(|a| a.call_id() == id)
                || self.queue.iter().any(|q| q.call_id() == id)
                || calls.iter().filter(|c| c.call_id() == id).count() > 1;
            if dup {
                return Err(SchedulerError::DuplicateCallId(id.as_str().to_string()));
            }
        }
        self.queue.extend(calls);
        self.emit();
        Ok(())
    }

    /// Removes the head of the queue and promotes it to the active slot.
    pub fn dequeue(&mut self) -> Option<ToolCallState> {
        let call = self.queue.pop_front()?;
        self.active = Some(call.clone());
        self.emit();
        Some(call)
    }

    /// The unique non-terminal, non-queued call, if any.
    pub fn get_first_active_call(&self) -> Option<&ToolCallState> {
        self.active.as_ref()
    }

    fn require_active(&mut self, call_id: &CallId, to: &'static str) -> Result<&mut ToolCallState> {
        let matches = match &self.active {
            Some(active) => active.call_id() == call_id,
            None => false,
        };
        if matches {
            return self.active.as_mut().ok_or_else(|| SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: "absent",
                to,
            });
        }
        Err(SchedulerError::InvalidTransition {
            call_id: call_id.as_str().to_string(),
            from: self.active.as_ref().map_or("absent", ToolCallState::status_name),
            to,
        })
    }

    fn elapsed_ms(start: Instant) -> u64 {
        u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Records the confirmation outcome that will eventually resolve
    /// `call_id`, so `log_telemetry` can report it once the call lands in
    /// whichever terminal status `status_name()` produces.
    pub fn set_outcome(&mut self, call_id: &CallId, outcome: ConfirmationOutcome) {
        self.outcomes.insert(call_id.clone(), outcome);
    }

    /// The outcome previously recorded via `set_outcome`, if any.
    pub fn get_outcome(&self, call_id: &CallId) -> Option<ConfirmationOutcome> {
        self.outcomes.get(call_id).copied()
    }

    /// `{validating, awaiting_approval} -> scheduled`.
    pub fn to_scheduled(&mut self, call_id: &CallId, outcome: ConfirmationOutcome) -> Result<()> {
        let call = self.require_active(call_id, "scheduled")?;
        let (request, tool, invocation, start_time) = match call.clone() {
            ToolCallState::Validating {
                request,
                tool,
                invocation,
                start_time,
            }
            | ToolCallState::AwaitingApproval {
                request,
                tool,
                invocation,
                start_time,
                ..
            } => (request, tool, invocation, start_time),
            other => {
                return Err(SchedulerError::InvalidTransition {
                    call_id: call_id.as_str().to_string(),
                    from: other.status_name(),
                    to: "scheduled",
                });
            }
        };
        *call = ToolCallState::Scheduled {
            request,
            tool,
            invocation,
            start_time,
            outcome,
        };
        self.emit();
        Ok(())
    }

    /// `{validating, scheduled} -> awaiting_approval`; registers `details`
    /// and `correlationId`.
    pub fn to_awaiting_approval(
        &mut self,
        call_id: &CallId,
        details: Arc<ConfirmationDetails>,
        correlation_id: u64,
    ) -> Result<()> {
        let call = self.require_active(call_id, "awaiting_approval")?;
        let (request, tool, invocation, start_time) = match call.clone() {
            ToolCallState::Validating {
                request,
                tool,
                invocation,
                start_time,
            }
            | ToolCallState::Scheduled {
                request,
                tool,
                invocation,
                start_time,
                ..
            } => (request, tool, invocation, start_time),
            other => {
                return Err(SchedulerError::InvalidTransition {
                    call_id: call_id.as_str().to_string(),
                    from: other.status_name(),
                    to: "awaiting_approval",
                });
            }
        };
        *call = ToolCallState::AwaitingApproval {
            request,
            tool,
            invocation,
            start_time,
            details,
            correlation_id,
        };
        self.emit();
        Ok(())
    }

    /// `scheduled -> executing`.
    pub fn to_executing(&mut self, call_id: &CallId) -> Result<()> {
        let call = self.require_active(call_id, "executing")?;
        let ToolCallState::Scheduled {
            request,
            tool,
            invocation,
            start_time,
            outcome,
        } = call.clone()
        else {
            return Err(SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: call.status_name(),
                to: "executing",
            });
        };
        *call = ToolCallState::Executing {
            request,
            tool,
            invocation,
            start_time,
            outcome,
            live_output: None,
            pid: None,
        };
        self.emit();
        Ok(())
    }

    /// Appends a live stdout/stderr chunk to the executing call, fed by the
    /// executor's `outputUpdateHandler` callback.
    pub fn append_output(&mut self, call_id: &CallId, chunk: &str) -> Result<()> {
        let call = self.require_active(call_id, "executing")?;
        match call {
            ToolCallState::Executing { live_output, .. } => {
                live_output
                    .get_or_insert_with(String::new)
                    .push_str(chunk);
                self.emit();
                Ok(())
            }
            other => Err(SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: other.status_name(),
                to: "executing",
            }),
        }
    }

    /// Records the spawned process id as soon as it is known.
    pub fn set_pid(&mut self, call_id: &CallId, new_pid: u32) -> Result<()> {
        let call = self.require_active(call_id, "executing")?;
        match call {
            ToolCallState::Executing { pid, .. } => {
                *pid = Some(new_pid);
                self.emit();
                Ok(())
            }
            other => Err(SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: other.status_name(),
                to: "executing",
            }),
        }
    }

    /// `executing -> success`.
    pub fn to_success(&mut self, call_id: &CallId, response: Response) -> Result<()> {
        let call = self.require_active(call_id, "success")?;
        let start_time = call.start_time();
        let tool_name = call.tool_name().to_string();
        match call {
            ToolCallState::Executing { .. } => {
                let duration_ms = start_time.map(Self::elapsed_ms).unwrap_or_default();
                *call = ToolCallState::Success {
                    call_id: call_id.clone(),
                    tool_name,
                    response,
                    duration_ms,
                };
                self.emit();
                Ok(())
            }
            other => Err(SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: other.status_name(),
                to: "success",
            }),
        }
    }

    /// Any non-terminal status `-> error`.
    pub fn to_error(&mut self, call_id: &CallId, response: Response, error_type: ErrorType) -> Result<()> {
        let call = self.require_active(call_id, "error")?;
        if call.is_terminal() {
            return Err(SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: call.status_name(),
                to: "error",
            });
        }
        let duration_ms = call.start_time().map(Self::elapsed_ms).unwrap_or_default();
        let tool_name = call.tool_name().to_string();
        *call = ToolCallState::Error {
            call_id: call_id.clone(),
            tool_name,
            response,
            duration_ms,
            error_type,
        };
        self.emit();
        Ok(())
    }

    /// Any non-terminal status `-> cancelled`.
    pub fn to_cancelled(&mut self, call_id: &CallId, reason: impl Into<String>) -> Result<()> {
        let call = self.require_active(call_id, "cancelled")?;
        if call.is_terminal() {
            return Err(SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: call.status_name(),
                to: "cancelled",
            });
        }
        let duration_ms = call.start_time().map(Self::elapsed_ms).unwrap_or_default();
        let tool_name = call.tool_name().to_string();
        *call = ToolCallState::Cancelled {
            call_id: call_id.clone(),
            tool_name,
            reason: reason.into(),
            duration_ms,
        };
        self.emit();
        Ok(())
    }

    /// Pre-errored calls are constructed directly in `error` status and never
    /// occupy the active slot; this pushes one straight onto the completed
    /// list, finalizing it immediately.
    pub fn push_completed(&mut self, call: ToolCallState) {
        self.completed.push(call);
        self.emit();
    }

    /// Only legal while the call is `awaiting_approval`; transitions it back
    /// to `validating` with a freshly built invocation so the confirmation
    /// loop can re-evaluate.
    pub fn update_args(
        &mut self,
        call_id: &CallId,
        new_args: serde_json::Value,
        new_invocation: Arc<dyn Invocation>,
    ) -> Result<()> {
        let call = self.require_active(call_id, "validating")?;
        let ToolCallState::AwaitingApproval {
            mut request,
            tool,
            start_time,
            ..
        } = call.clone()
        else {
            return Err(SchedulerError::UpdateArgsNotAwaitingApproval {
                call_id: call_id.as_str().to_string(),
                actual: call.status_name(),
            });
        };
        request.args = new_args;
        *call = ToolCallState::Validating {
            request,
            tool,
            invocation: new_invocation,
            start_time,
        };
        self.emit();
        Ok(())
    }

    /// Moves a terminal call from the active slot to the completed list.
    pub fn finalize_call(&mut self, call_id: &CallId) -> Result<()> {
        let call = self.require_active(call_id, "finalized")?;
        if !call.is_terminal() {
            return Err(SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: call.status_name(),
                to: "finalized",
            });
        }
        let call = self
            .active
            .take()
            .ok_or_else(|| SchedulerError::InvalidTransition {
                call_id: call_id.as_str().to_string(),
                from: "absent",
                to: "finalized",
            })?;
        self.completed.push(call);
        self.emit();
        Ok(())
    }

    /// Transitions every queued-but-not-yet-active call directly to
    /// `cancelled`, skipping intermediate states, by marking it cancelled in
    /// place without disturbing queue order — so each one finalizes through
    /// the normal dequeue path once the active call ahead of it finishes,
    /// keeping `completed` in request order.
    pub fn cancel_all_queued(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        for call in &mut self.queue {
            let duration_ms = call.start_time().map(Self::elapsed_ms).unwrap_or_default();
            *call = ToolCallState::Cancelled {
                call_id: call.call_id().clone(),
                tool_name: call.tool_name().to_string(),
                reason: reason.clone(),
                duration_ms,
            };
        }
        self.emit();
    }

    /// The finalized, terminal calls for consumption by the caller. Note:
    /// the scheduler calls `clear_batch` at the start of every batch, so
    /// callers must read this before issuing the next `schedule()`.
    pub fn get_completed_batch(&self) -> &[ToolCallState] {
        &self.completed
    }

    pub fn has_active_calls(&self) -> bool {
        self.active.is_some() || !self.queue.is_empty()
    }

    pub fn get_queue_length(&self) -> usize {
        self.queue.len()
    }
}
