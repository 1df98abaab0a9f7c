//! Event-driven orchestrator that drives batches of model-issued tool calls
//! through validation, policy evaluation, user confirmation, execution and
//! result capture, while honoring cooperative cancellation and serial batch
//! semantics.

pub mod bus;
pub mod config;
pub mod error;
pub mod modification;
pub mod policy;
pub mod scheduler;
pub mod telemetry;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use scheduler::Scheduler;
pub use scheduler::state_store::{ConfirmationOutcome, ToolCallState};
