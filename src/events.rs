use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Events emitted by the pipeline. Cart events are advisory notifications for
/// UI badges and are never transactional; payment events record pipeline
/// milestones for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_uuid: Uuid,
        variant_id: Uuid,
        quantity: u32,
    },
    CartItemUpdated {
        cart_uuid: Uuid,
        variant_id: Uuid,
        quantity: u32,
    },
    CartItemRemoved {
        cart_uuid: Uuid,
        variant_id: Uuid,
    },
    CouponApplied {
        cart_uuid: Uuid,
        code: String,
    },
    CouponRemoved {
        cart_uuid: Uuid,
    },
    CartCleared(Uuid),

    // Payment events
    PaymentIntentCreated {
        cart_uuid: Uuid,
        payment_intent_id: String,
    },
    PaymentIntentLinked {
        payment_intent_id: String,
        order_id: Uuid,
    },
    SettlementSucceeded {
        payment_intent_id: String,
        attempts: u32,
    },
    SettlementFailed {
        payment_intent_id: String,
        attempts: u32,
    },

    // Checkout events
    CheckoutCompleted {
        cart_uuid: Uuid,
        order_code: String,
    },
    CheckoutFailed {
        cart_uuid: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of erroring when nobody is listening.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Creates the event channel the pipeline publishes to.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}
