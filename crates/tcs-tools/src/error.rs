use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a [`Tool`](crate::Tool) build or a running
/// [`Invocation`](crate::Invocation).
///
/// This is the error an individual tool implementation hands back; the
/// scheduler never constructs most of these variants itself — it only
/// inspects them (e.g. to decide whether an executor failure should be
/// laundered into a `cancelled` transition).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParams { tool_name: String, message: String },

    #[error("{tool_name} failed: {message}")]
    Execution { tool_name: String, message: String },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0} requires approval to run")]
    DeniedByUser(String),

    #[error("{0} denied by approval policy")]
    DeniedByPolicy(String),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn invalid_params<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::InvalidParams {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn execution<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}
