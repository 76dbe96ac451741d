use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::entities::{
    order::OrderStatus,
    reservation::{CancellationReason, ReservationStatus},
};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender with its receiving half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes an event for a change that is already committed.
    ///
    /// The command has succeeded at this point, so a closed channel is logged
    /// and counted instead of being returned to the caller.
    pub async fn publish(&self, event: Event) {
        let kind = event.kind();
        if let Err(e) = self.send(event).await {
            counter!("pharmacy_events.dropped", 1, "kind" => kind);
            warn!(kind, error = %e, "Dropping domain event");
        }
    }
}

/// Domain events published after a stock-affecting transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ReservationCreated {
        reservation_id: i32,
        patient_id: i32,
        branch_id: i32,
        item_id: i32,
        quantity: i32,
    },
    ReservationStatusChanged {
        reservation_id: i32,
        old_status: ReservationStatus,
        new_status: ReservationStatus,
    },
    ReservationCancelled {
        reservation_id: i32,
        reason: CancellationReason,
        quantity_released: i32,
    },
    OrderCreated {
        order_id: i32,
        patient_id: i32,
        branch_id: i32,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    StockLow {
        branch_id: i32,
        item_id: i32,
        quantity: i32,
        threshold: i32,
    },
    ReservationsExpired {
        expired: u64,
        swept_at: DateTime<Utc>,
    },
}

impl Event {
    /// Short name used as a metric label and log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationStatusChanged { .. } => "reservation_status_changed",
            Event::ReservationCancelled { .. } => "reservation_cancelled",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::StockLow { .. } => "stock_low",
            Event::ReservationsExpired { .. } => "reservations_expired",
        }
    }
}

/// Drains the event channel until every sender is dropped.
///
/// Notification delivery lives outside this crate; the loop records each
/// event so downstream collaborators can subscribe to the log stream.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("pharmacy_events.processed", 1, "kind" => event.kind());

        match &event {
            Event::StockLow {
                branch_id,
                item_id,
                quantity,
                threshold,
            } => {
                warn!(
                    branch_id,
                    item_id, quantity, threshold, "Stock below threshold"
                );
            }
            Event::ReservationCancelled {
                reservation_id,
                reason,
                quantity_released,
            } => {
                info!(
                    reservation_id,
                    reason = %reason,
                    quantity_released,
                    "Reservation released its hold"
                );
            }
            other => {
                info!(kind = other.kind(), event = ?other, "Domain event");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_after_receiver_dropped_does_not_fail() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        sender
            .publish(Event::OrderCreated {
                order_id: 1,
                patient_id: 2,
                branch_id: 3,
                total_amount: Decimal::new(1250, 2),
            })
            .await;
        assert!(sender
            .send(Event::ReservationsExpired {
                expired: 0,
                swept_at: Utc::now(),
            })
            .await
            .is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::OrderStatusChanged {
            order_id: 4,
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::ReadyForPickup,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_status_changed");
        assert_eq!(json["new_status"], "ready_for_pickup");
    }

    #[tokio::test]
    async fn processor_stops_when_senders_close() {
        let (sender, rx) = EventSender::channel(4);
        sender
            .publish(Event::StockLow {
                branch_id: 1,
                item_id: 5,
                quantity: 2,
                threshold: 10,
            })
            .await;
        drop(sender);
        process_events(rx).await;
    }
}
