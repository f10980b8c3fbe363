use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Domain events emitted by the checkout workflow.
///
/// Events are fire-and-forget notifications; the synchronous extension points
/// that may rewrite the workflow's inputs live in [`crate::hooks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStateChanged {
        order_id: Uuid,
        state_id: Uuid,
    },
    CheckoutCompleted {
        cart_id: Uuid,
        reference: String,
        order_ids: Vec<Uuid>,
    },
    VoucherIssued {
        cart_rule_id: Uuid,
        code: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Builds a sender together with its receiving half.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    /// Sends an event; delivery failure is logged, never surfaced.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "failed to publish checkout event");
        }
    }
}
