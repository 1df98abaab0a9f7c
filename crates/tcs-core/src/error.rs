use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Contract violations the scheduler treats as fatal developer bugs rather
/// than ordinary terminal-error calls.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(
        "policy engine returned ASK_USER while the process is non-interactive; \
         the policy engine is required to have already returned DENY"
    )]
    AskUserInNonInteractive,

    #[error("invalid state transition for call {call_id}: {from} -> {to}")]
    InvalidTransition {
        call_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("duplicate callId enqueued: {0}")]
    DuplicateCallId(String),

    #[error("updateArgs called on call {call_id} while not awaiting_approval (was {actual})")]
    UpdateArgsNotAwaitingApproval { call_id: String, actual: &'static str },
}
