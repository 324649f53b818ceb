use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::ShippingStatus;

/// Handle for publishing domain events to the in-process event loop
#[derive(Clone, Debug)]
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

    /// Sends an event; delivery problems are logged and never fail the caller
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        total_amount: Decimal,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        discount_amount: Decimal,
    },
    ShipmentGuideCreated {
        order_id: Uuid,
        shipment_id: Uuid,
        tracking_number: String,
    },
    ShipmentStatusChanged {
        order_id: Uuid,
        shipment_id: Uuid,
        old_status: ShippingStatus,
        new_status: ShippingStatus,
        occurred_at: DateTime<Utc>,
    },
    ShipmentCancelled {
        order_id: Uuid,
        shipment_id: Option<Uuid>,
    },
}

/// Drains the event channel until every sender is dropped.
///
/// This is where order and shipment notifications (e-mail, push) hook in;
/// for now every event is logged.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                total_amount,
            } => {
                info!(%order_id, %total_amount, "order created");
            }
            Event::CouponRedeemed {
                coupon_id,
                order_id,
                discount_amount,
            } => {
                info!(%coupon_id, %order_id, %discount_amount, "coupon redeemed");
            }
            Event::ShipmentGuideCreated {
                order_id,
                shipment_id,
                tracking_number,
            } => {
                info!(%order_id, %shipment_id, tracking_number = %tracking_number, "shipping guide created");
            }
            Event::ShipmentStatusChanged {
                order_id,
                shipment_id,
                old_status,
                new_status,
                occurred_at,
            } => {
                info!(
                    %order_id,
                    %shipment_id,
                    from = %old_status,
                    to = %new_status,
                    %occurred_at,
                    "shipment status changed"
                );
            }
            Event::ShipmentCancelled {
                order_id,
                shipment_id,
            } => {
                info!(%order_id, shipment_id = ?shipment_id, "shipment cancelled");
            }
        }
    }

    error!("Event channel closed; event processing loop stopped");
}
