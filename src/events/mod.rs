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

    /// Sends an event, logging instead of failing when the channel is closed
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events raised by the checkout pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartCleared {
        user_id: Uuid,
        cart_id: Uuid,
    },
    CheckoutSessionCreated {
        session_id: String,
        user_id: Uuid,
        total: Decimal,
    },
    CheckoutFailed {
        session_id: String,
        reason: String,
    },
    CheckoutExpired {
        session_id: String,
    },
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
        created_at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

/// Drains the event channel until every sender is dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CartCleared { user_id, cart_id } => {
                info!(%user_id, %cart_id, "cart cleared");
            }
            Event::CheckoutSessionCreated {
                session_id,
                user_id,
                total,
            } => {
                info!(%session_id, %user_id, %total, "checkout session created");
            }
            Event::CheckoutFailed { session_id, reason } => {
                warn!(%session_id, %reason, "checkout failed");
            }
            Event::CheckoutExpired { session_id } => {
                info!(%session_id, "checkout expired");
            }
            Event::OrderCreated {
                order_id,
                user_id,
                total,
                ..
            } => {
                info!(%order_id, %user_id, %total, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let session_id = "cs_test_42".to_string();

        sender
            .send(Event::CheckoutExpired {
                session_id: session_id.clone(),
            })
            .await
            .unwrap();

        assert_matches!(rx.recv().await, Some(Event::CheckoutExpired { session_id: s }) if s == session_id);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender
            .send(Event::CheckoutExpired {
                session_id: "cs_gone".into(),
            })
            .await;
        assert!(result.is_err());

        // must not panic
        sender
            .send_or_log(Event::CheckoutExpired {
                session_id: "cs_gone".into(),
            })
            .await;
    }
}
