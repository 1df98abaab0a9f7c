use crate::bus::{BusMessage, ConfirmationResponse, MessageBus};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Drops alongside its `await_confirmation` call, regardless of which exit
/// path was taken. The underlying `broadcast::Receiver` already unsubscribes
/// on drop; this wrapper exists so that fact is a visible invariant rather
/// than an implementation detail to trust.
struct Waiter {
    correlation_id: u64,
    rx: broadcast::Receiver<BusMessage>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        tracing::trace!(correlation_id = self.correlation_id, "confirmation waiter released");
    }
}

/// Pairs outbound `ToolConfirmationRequest` messages with inbound
/// `ToolConfirmationResponse` messages by correlation id.
pub struct ConfirmationCoordinator {
    bus: Arc<dyn MessageBus>,
    next_correlation_id: AtomicU64,
}

impl ConfirmationCoordinator {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            next_correlation_id: AtomicU64::new(1),
        }
    }

    pub fn mint_correlation_id(&self) -> u64 {
        self.next_correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolves on the first `ToolConfirmationResponse` matching
    /// `correlation_id`, `None` if `cancel` fires first or the bus closes.
    /// An external producer (an IDE diff widget) publishing a response for
    /// this id is indistinguishable from any other responder — the
    /// coordinator only cares that exactly one response resolves it.
    pub async fn await_confirmation(
        &self,
        correlation_id: u64,
        cancel: &CancellationToken,
    ) -> Option<ConfirmationResponse> {
        let mut waiter = Waiter {
            correlation_id,
            rx: self.bus.subscribe(),
        };
        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                received = waiter.rx.recv() => {
                    match received {
                        Ok(BusMessage::ToolConfirmationResponse(response))
                            if response.correlation_id == correlation_id =>
                        {
                            return Some(response);
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }
    }
}
