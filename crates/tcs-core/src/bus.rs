use crate::scheduler::state_store::{ConfirmationOutcome, ToolCallState};
use tcs_tools::registry::ConfirmationDetails;
use tokio::sync::broadcast;

/// Inline payload an `IDE` diff widget or inline confirmation response may
/// carry alongside an outcome.
#[derive(Debug, Clone)]
pub struct ModifyPayload {
    pub new_content: Option<String>,
}

/// A confirmation response arriving over the bus, keyed by correlation id.
#[derive(Debug, Clone)]
pub struct ConfirmationResponse {
    pub correlation_id: u64,
    pub confirmed: bool,
    pub outcome: Option<ConfirmationOutcome>,
    pub payload: Option<ModifyPayload>,
}

/// The topic-keyed messages the scheduler produces and consumes. Implemented
/// as one typed enum over a single broadcast channel rather than
/// stringly-typed topics.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// `TOOL_STATE_UPDATE` (out): batch snapshot.
    ToolStateUpdate { batch: Vec<ToolCallState> },
    /// `TOOL_CONFIRMATION_REQUEST` (out).
    ToolConfirmationRequest {
        correlation_id: u64,
        tool_name: String,
        details: std::sync::Arc<ConfirmationDetails>,
    },
    /// `TOOL_CONFIRMATION_RESPONSE` (in/out).
    ToolConfirmationResponse(ConfirmationResponse),
    /// `UPDATE_POLICY` (out).
    UpdatePolicy {
        tool_name: String,
        mcp_name: Option<String>,
        persist: bool,
        command_prefix: Option<Vec<String>>,
    },
    /// `TOOL_NOTIFICATION_HOOK` (out, optional).
    ToolNotificationHook {
        details: std::sync::Arc<ConfirmationDetails>,
    },
}

/// Abstract publish/subscribe medium. All publishers fire-and-forget; all
/// subscribers are responsible for removing themselves.
pub trait MessageBus: Send + Sync {
    fn publish(&self, message: BusMessage);
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

/// Default in-process bus, backed by a `tokio::sync::broadcast` channel.
pub struct InMemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, message: BusMessage) {
        // Fire-and-forget: no subscribers is not an error.
        let _ = self.tx.send(message);
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl InMemoryBus {
    /// Number of live subscribers; used by tests to confirm a waiter's
    /// subscription was actually dropped.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
