use crate::error::Result;
use crate::scheduler::state_store::StateStore;
use tcs_tools::registry::{ExecCallbacks, Invocation};
use tcs_tools::response::{ErrorType, Response};
use tcs_tools::{CallId, ToolError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum ExecutorUpdate {
    Output(String),
    Pid(u32),
}

/// Runs a single validated invocation, forwarding live output and process
/// identity back to the store.
pub struct Executor;

impl Executor {
    /// Drives `invocation` to completion and writes its terminal status
    /// into `store`. The invocation's callbacks forward updates over an
    /// unbounded channel rather than touching `store` directly — it is not
    /// `Sync` and cannot be shared with the invocation's (potentially
    /// multi-threaded) internals — and the channel is drained concurrently
    /// with `execute()` so `live_output`/`pid` become observable while the
    /// tool is still running, not only after it returns.
    pub async fn execute(
        &self,
        call_id: &CallId,
        invocation: &dyn Invocation,
        cancel: CancellationToken,
        store: &mut StateStore,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ExecutorUpdate>();

        let output_tx = tx.clone();
        let on_output = move |chunk: &str| {
            let _ = output_tx.send(ExecutorUpdate::Output(chunk.to_string()));
        };

        let on_pid = move |pid: u32| {
            let _ = tx.send(ExecutorUpdate::Pid(pid));
        };

        let callbacks = ExecCallbacks {
            on_output: &on_output,
            on_pid: &on_pid,
        };

        let mut execute_fut = std::pin::pin!(invocation.execute(cancel.clone(), callbacks));
        let result = loop {
            tokio::select! {
                result = &mut execute_fut => break result,
                Some(update) = rx.recv() => Self::apply_update(store, call_id, update)?,
            }
        };
        while let Ok(update) = rx.try_recv() {
            Self::apply_update(store, call_id, update)?;
        }

        match result {
            Ok(outcome) => {
                let response = Response::success(call_id.clone(), outcome.parts, outcome.display_text);
                store.to_success(call_id, response)?;
            }
            Err(ToolError::Cancelled(reason)) => {
                store.to_cancelled(call_id, reason)?;
            }
            Err(_) if cancel.is_cancelled() => {
                store.to_cancelled(call_id, "Operation cancelled")?;
            }
            Err(err) => {
                let response = Response::error(call_id.clone(), ErrorType::ExecutionFailed, err.to_string(), vec![]);
                store.to_error(call_id, response, ErrorType::ExecutionFailed)?;
            }
        }
        Ok(())
    }

    fn apply_update(store: &mut StateStore, call_id: &CallId, update: ExecutorUpdate) -> Result<()> {
        match update {
            ExecutorUpdate::Output(chunk) => store.append_output(call_id, &chunk),
            ExecutorUpdate::Pid(pid) => store.set_pid(call_id, pid),
        }
    }
}
