use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopflow_catalog::Product;
use std::fmt;
use uuid::Uuid;

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Validated,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(OrderStatus::Created),
            "VALIDATED" => Some(OrderStatus::Validated),
            "PAID" => Some(OrderStatus::Paid),
            "SHIPPED" => Some(OrderStatus::Shipped),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REFUNDED" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    /// Edges of the lifecycle graph.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, Validated)
                | (Created | Validated, Paid)
                | (Paid, Shipped)
                | (Shipped, Delivered)
                | (Created | Validated | Paid, Cancelled)
                | (Paid | Cancelled, Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line captured at checkout. Name and price are copied from the catalog
/// and never looked up again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

impl OrderItem {
    pub fn snapshot(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            unit_price_cents: product.price_cents,
            quantity,
        }
    }

    pub fn line_total(&self) -> i64 {
        shopflow_shared::line_total(self.unit_price_cents, self.quantity)
    }
}

/// When each lifecycle stage was reached. Every stamp is written at most
/// once and never earlier than the latest existing stamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeline {
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Timeline {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            validated_at: None,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            refunded_at: None,
        }
    }

    pub fn get(&self, stage: OrderStatus) -> Option<DateTime<Utc>> {
        match stage {
            OrderStatus::Created => Some(self.created_at),
            OrderStatus::Validated => self.validated_at,
            OrderStatus::Paid => self.paid_at,
            OrderStatus::Shipped => self.shipped_at,
            OrderStatus::Delivered => self.delivered_at,
            OrderStatus::Cancelled => self.cancelled_at,
            OrderStatus::Refunded => self.refunded_at,
        }
    }

    /// Latest stamp recorded so far.
    pub fn latest(&self) -> DateTime<Utc> {
        [
            self.validated_at,
            self.paid_at,
            self.shipped_at,
            self.delivered_at,
            self.cancelled_at,
            self.refunded_at,
        ]
        .into_iter()
        .flatten()
        .fold(self.created_at, |acc, t| acc.max(t))
    }

    /// Record `stage` at `at`, clamped forward to keep stamps monotonic.
    /// Returns `false` when the stage was already stamped.
    pub fn stamp(&mut self, stage: OrderStatus, at: DateTime<Utc>) -> bool {
        let at = at.max(self.latest());
        let slot = match stage {
            OrderStatus::Created => return false,
            OrderStatus::Validated => &mut self.validated_at,
            OrderStatus::Paid => &mut self.paid_at,
            OrderStatus::Shipped => &mut self.shipped_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
            OrderStatus::Refunded => &mut self.refunded_at,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid state transition for order {order_id} from {from} to {to}")]
pub struct InvalidTransition {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// The durable record of a purchase. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub timeline: Timeline,
    pub delivery: Option<Delivery>,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    /// Bumped by the repository on every successful update.
    pub version: u64,
}

impl Order {
    pub fn new(user_id: Uuid, items: Vec<OrderItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            items,
            status: OrderStatus::Created,
            timeline: Timeline::new(Utc::now()),
            delivery: None,
            invoice_id: None,
            payment_id: None,
            version: 0,
        }
    }

    /// Σ unit price × quantity over the captured lines.
    pub fn total_cents(&self) -> i64 {
        self.items
            .iter()
            .fold(0i64, |acc, item| acc.saturating_add(item.line_total()))
    }

    /// Move to `next`, stamping the timeline.
    pub fn advance(&mut self, next: OrderStatus, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let rejected = InvalidTransition {
            order_id: self.id,
            from: self.status,
            to: next,
        };
        if !self.status.can_transition_to(next) {
            return Err(rejected);
        }
        if !self.timeline.stamp(next, at) {
            return Err(rejected);
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Prepared,
    InTransit,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Prepared => "PREPARED",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PREPARED" => Some(DeliveryStatus::Prepared),
            "IN_TRANSIT" => Some(DeliveryStatus::InTransit),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parcel record attached to an order at ship time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub carrier: String,
    pub tracking_number: Option<String>,
    pub address: String,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

/// Immutable bill for a paid order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoice {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub lines: Vec<InvoiceLine>,
    pub total_cents: i64,
    pub issued_at: DateTime<Utc>,
}
