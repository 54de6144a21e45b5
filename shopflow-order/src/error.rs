use shopflow_core::{CardError, GatewayError, StoreError};
use uuid::Uuid;

use crate::delivery::DeliveryError;
use crate::models::{InvalidTransition, OrderStatus};

/// Everything the orchestrator can refuse or fail with.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} is unavailable")]
    ProductUnavailable(Uuid),

    #[error("Insufficient stock for {name} ({product_id}): requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        name: String,
        requested: u32,
        available: u32,
    },

    #[error("Order {order_id} is {status}: {reason}")]
    InvalidOrderState {
        order_id: Uuid,
        status: OrderStatus,
        reason: String,
    },

    #[error("Payment {payment_id} for order {order_id} declined: {reason}")]
    PaymentDeclined {
        order_id: Uuid,
        payment_id: Uuid,
        reason: String,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid card: {0}")]
    InvalidCard(#[from] CardError),

    #[error("Invalid refund amount {amount} for order total {total}")]
    InvalidRefundAmount { amount: i64, total: i64 },

    #[error("Refund for order {order_id} was refused by the payment provider")]
    RefundFailed { order_id: Uuid },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(StoreError),
}

impl OrderError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(order_id: Uuid, status: OrderStatus, reason: impl Into<String>) -> Self {
        Self::InvalidOrderState {
            order_id,
            status,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => OrderError::NotFound { entity, id },
            other => OrderError::Store(other),
        }
    }
}

impl From<InvalidTransition> for OrderError {
    fn from(err: InvalidTransition) -> Self {
        OrderError::InvalidOrderState {
            order_id: err.order_id,
            status: err.from,
            reason: format!("cannot move to {}", err.to),
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;
