pub mod identity;
pub mod payment;
pub mod repository;

pub use identity::{InMemoryUserRepository, User};
pub use payment::{
    CardDetails, CardError, ChargeResult, GatewayError, InMemoryPaymentRepository, Payment,
    PaymentGateway, RefundResult,
};
pub use repository::{PaymentRepository, UserRepository};

use uuid::Uuid;

/// Failures raised by any repository implementation, in-memory or remote.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient stock for product {product_id}: requested {requested}")]
    InsufficientStock { product_id: Uuid, requested: u32 },

    #[error("Product {product_id} is not active")]
    Inactive { product_id: Uuid },

    #[error("Stale write rejected for {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("Duplicate {entity}: {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("Storage backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
