//! The policy engine external collaborator.

use async_trait::async_trait;
use serde_json::Value;

/// The policy engine's verdict on a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
    AskUser,
}

/// External oracle that classifies a tool call before it runs. Implementors
/// are required to already honor the interactive/non-interactive distinction
/// — returning `Deny` rather than `AskUser` when the process is
/// non-interactive; the scheduler treats a stray `AskUser` in non-interactive
/// mode as a fatal contract violation rather than guessing.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn check(
        &self,
        tool_name: &str,
        args: &Value,
        server_name: Option<&str>,
        interactive: bool,
    ) -> PolicyDecision;
}

/// Always allows. Useful for embedders running in YOLO mode and for tests
/// that only exercise the execution path.
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyEngine for AllowAllPolicy {
    async fn check(&self, _tool_name: &str, _args: &Value, _server_name: Option<&str>, _interactive: bool) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Always asks the user, unless non-interactive, in which case it denies
/// (the interactive/non-interactive contract this trait requires of every
/// implementor).
pub struct AskUserPolicy;

#[async_trait]
impl PolicyEngine for AskUserPolicy {
    async fn check(&self, _tool_name: &str, _args: &Value, _server_name: Option<&str>, interactive: bool) -> PolicyDecision {
        if interactive {
            PolicyDecision::AskUser
        } else {
            PolicyDecision::Deny
        }
    }
}
