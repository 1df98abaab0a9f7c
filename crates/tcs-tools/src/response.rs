use crate::schema::CallId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The terminal payload of a tool call, handed back to both the caller (for
/// rendering) and, via `parts`, fed back into the model as a function
/// response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub call_id: CallId,
    /// Structured function-response payload suitable for the model.
    pub parts: Vec<Value>,
    /// Human-readable rendering of the result.
    pub display_text: String,
    /// Present only for non-success terminal statuses.
    pub error_type: Option<ErrorType>,
    pub byte_length: usize,
}

impl Response {
    pub fn success(call_id: CallId, parts: Vec<Value>, display_text: impl Into<String>) -> Self {
        let display_text = display_text.into();
        let byte_length = display_text.len();
        Self {
            call_id,
            parts,
            display_text,
            error_type: None,
            byte_length,
        }
    }

    pub fn error(
        call_id: CallId,
        error_type: ErrorType,
        display_text: impl Into<String>,
        parts: Vec<Value>,
    ) -> Self {
        let display_text = display_text.into();
        let byte_length = display_text.len();
        Self {
            call_id,
            parts,
            display_text,
            error_type: Some(error_type),
            byte_length,
        }
    }
}

/// The error kinds the scheduler recognizes and propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    ToolNotRegistered,
    InvalidToolParams,
    PolicyViolation,
    UnhandledException,
    /// Verbatim pass-through of a tool/executor-produced error.
    ExecutionFailed,
}
