use tracing::info;
use uuid::Uuid;

use crate::models::{Delivery, DeliveryStatus, Order};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery {delivery_id} cannot move from {from} to {to}")]
    InvalidTransition {
        delivery_id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

/// Creates parcels, assigns tracking numbers and records hand-over.
#[derive(Debug, Clone)]
pub struct DeliveryCoordinator {
    default_carrier: String,
}

impl DeliveryCoordinator {
    pub fn new(default_carrier: impl Into<String>) -> Self {
        Self {
            default_carrier: default_carrier.into(),
        }
    }

    pub fn default_carrier(&self) -> &str {
        &self.default_carrier
    }

    pub fn prepare_delivery(&self, order: &Order, address: &str, carrier: Option<&str>) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            order_id: order.id,
            carrier: carrier.unwrap_or(&self.default_carrier).to_string(),
            tracking_number: None,
            address: address.to_string(),
            status: DeliveryStatus::Prepared,
        }
    }

    /// Hand the parcel to the carrier, assigning a tracking number if it has none.
    pub fn ship(&self, mut delivery: Delivery) -> Result<Delivery, DeliveryError> {
        if delivery.status != DeliveryStatus::Prepared {
            return Err(DeliveryError::InvalidTransition {
                delivery_id: delivery.id,
                from: delivery.status,
                to: DeliveryStatus::InTransit,
            });
        }
        let tracking = delivery.tracking_number.get_or_insert_with(tracking_number);
        info!(
            order_id = %delivery.order_id,
            carrier = %delivery.carrier,
            tracking = %tracking,
            "Parcel shipped"
        );
        delivery.status = DeliveryStatus::InTransit;
        Ok(delivery)
    }

    pub fn mark_delivered(&self, mut delivery: Delivery) -> Result<Delivery, DeliveryError> {
        if delivery.status != DeliveryStatus::InTransit {
            return Err(DeliveryError::InvalidTransition {
                delivery_id: delivery.id,
                from: delivery.status,
                to: DeliveryStatus::Delivered,
            });
        }
        delivery.status = DeliveryStatus::Delivered;
        Ok(delivery)
    }
}

/// "TRK-" followed by 10 uppercase hex characters.
fn tracking_number() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TRK-{}", &hex[..10])
}
