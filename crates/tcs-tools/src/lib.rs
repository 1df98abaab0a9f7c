//! Tool, invocation and registry interfaces consumed by the tool-call scheduler.
//!
//! This crate intentionally contains no concrete tool implementations (no bash,
//! no file edit, no search) — those are external collaborators from the
//! scheduler's point of view. It defines the seams the scheduler calls through:
//! [`Tool`], [`Invocation`] and [`ToolRegistry`].

pub mod error;
pub mod registry;
pub mod response;
pub mod schema;

pub use error::ToolError;
pub use registry::{InMemoryToolRegistry, Invocation, Tool, ToolRegistry};
pub use response::Response;
pub use schema::{CallId, InputSchema, ToolCall, ToolSchema};
