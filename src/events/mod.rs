use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use serde::{Deserialize, Serialize};

/// Events emitted by the storefront services.
///
/// Delivery is best-effort: a full or closed channel is logged and dropped,
/// never surfaced to the request that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Catalog events
    ProductCreated(Uuid),
    ProductUpdated(Uuid),

    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
    },
    CartItemQuantityChanged {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },

    // Checkout events
    OrderPlaced {
        order_id: Uuid,
        total_minor: i64,
    },
    PaymentCaptured {
        order_id: Uuid,
        charge_id: String,
    },
    PaymentDeclined {
        order_id: Uuid,
    },
    /// A paid order could not be settled locally. This state requires operator
    /// reconciliation and must never be dropped silently.
    SettlementFailed {
        order_id: Uuid,
    },

    // Cancellation events
    OrderCancelled(Uuid),
    RefundStarted {
        order_id: Uuid,
        refund_row: Uuid,
    },
    RefundConfirmed {
        order_id: Uuid,
        refund_id: String,
    },
    RefundDispatchFailed {
        order_id: Uuid,
    },

    // Fulfilment events
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Feedback events
    FeedbackSubmitted {
        product_id: Uuid,
        stars: i32,
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

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing if the channel is down.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Event processing loop, spawned once at startup.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::SettlementFailed { order_id } => {
                // Keyed on by alerting; a paid order is sitting un-settled.
                error!(
                    order_id = %order_id,
                    "settlement failed after successful charge; order requires reconciliation"
                );
            }
            Event::RefundDispatchFailed { order_id } => {
                error!(
                    order_id = %order_id,
                    "refund dispatch failed after cancellation committed; order left in refund_started"
                );
            }
            Event::OrderPlaced {
                order_id,
                total_minor,
            } => {
                info!(order_id = %order_id, total_minor, "order placed");
            }
            Event::PaymentCaptured {
                order_id,
                charge_id,
            } => {
                info!(order_id = %order_id, charge_id = %charge_id, "payment captured");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
