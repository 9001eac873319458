use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The events this subsystem can emit. Consumers subscribe through
/// [`EventBus::subscribe`] and unsubscribe by dropping the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentSessionCreated {
        order_id: Uuid,
        gateway: String,
        gateway_reference: String,
    },
    PaymentCompleted {
        order_id: Uuid,
        payment_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },

    // Promotion events
    PromoCodeRedeemed {
        promo_code_id: Uuid,
        order_id: Uuid,
    },

    // Reaper events
    StaleOrdersReaped {
        count: u64,
        swept_at: DateTime<Utc>,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
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
}

/// Fan-out side of the event pipeline. Cloning is cheap; each call to
/// [`subscribe`](Self::subscribe) yields an independent receiver.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    fn publish(&self, event: Event) {
        // Err just means nobody is currently subscribed
        if let Err(e) = self.tx.send(event) {
            debug!("No active event subscribers: {}", e);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drains the mpsc side and republishes every event onto the broadcast
/// bus. Spawned once at startup; exits when all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, bus: EventBus) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentFailed { order_id, reason } => {
                warn!(order_id = %order_id, reason = %reason, "payment failed event");
            }
            other => {
                debug!(event = ?other, "event received");
            }
        }
        bus.publish(event);
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let (tx, rx) = mpsc::channel(16);
        let sender = EventSender::new(tx);
        let bus = EventBus::default();
        let mut subscription = bus.subscribe();

        let worker = tokio::spawn(process_events(rx, bus));

        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match subscription.recv().await.unwrap() {
            Event::OrderCreated(id) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }

        drop(sender);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_subscription_does_not_block_publishing() {
        let (tx, rx) = mpsc::channel(16);
        let sender = EventSender::new(tx);
        let bus = EventBus::default();
        drop(bus.subscribe());

        let worker = tokio::spawn(process_events(rx, bus));

        sender
            .send(Event::with_data("no listeners".to_string()))
            .await
            .unwrap();

        drop(sender);
        worker.await.unwrap();
    }
}
