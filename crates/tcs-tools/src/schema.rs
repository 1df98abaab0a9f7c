use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque identifier for a single tool call within a batch. Unique within
/// the active batch.
///
/// Newtype rather than a bare `String` so a stray call id and a tool name
/// can never be swapped at a call site by accident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single tool-invocation request as ingested from the model.
///
/// Immutable after ingestion except via the `ModificationHandler`, which
/// produces a *new* `ToolCall` (new args) rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: CallId,
    pub name: String,
    pub args: Value,
}

/// A tool's input schema, opaque to the scheduler beyond "did validation pass".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSchema(Value);

impl InputSchema {
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Metadata about a tool as advertised to the model, returned by the
/// registry for display and by `getAllToolNames` for nearest-name matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub input_schema: InputSchema,
}
