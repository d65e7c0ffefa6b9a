use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

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

    /// Sends an event, logging instead of failing when the channel is gone.
    /// Events are published after commit, so a lost event never affects stored state.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events emitted after a committed state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartUpdated {
        cart_id: Uuid,
        user_id: Uuid,
    },
    CouponApplied {
        cart_id: Uuid,
        code: String,
    },
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total: Decimal,
    },
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentConfirmed {
        order_id: Uuid,
        provider_transaction_id: String,
        confirmed_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartUpdated { .. } => "cart.updated",
            Event::CouponApplied { .. } => "cart.coupon_applied",
            Event::OrderCreated { .. } => "order.created",
            Event::OrderCancelled(_) => "order.cancelled",
            Event::OrderStatusChanged { .. } => "order.status_changed",
            Event::PaymentConfirmed { .. } => "payment.confirmed",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::increment_counter!("domain_events_total", "event" => event.name());
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                total,
            } => {
                info!(%order_id, %order_number, %total, "order created");
            }
            Event::PaymentConfirmed {
                order_id,
                provider_transaction_id,
                ..
            } => {
                info!(%order_id, %provider_transaction_id, "payment confirmed");
            }
            other => info!(event = other.name(), payload = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}
