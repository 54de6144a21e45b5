use async_trait::async_trait;
use shopflow_core::StoreResult;
use uuid::Uuid;

use crate::models::{Invoice, Order};

/// Durable order storage with optimistic concurrency.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order. Fails with `StoreError::Duplicate` if the id exists.
    async fn add(&self, order: &Order) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Persist `order` only if the stored version still equals `order.version`.
    /// Returns the new version, or `StoreError::Conflict` when another writer
    /// got there first.
    async fn update(&self, order: &Order) -> StoreResult<u64>;

    /// Orders placed by a user, oldest first.
    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>>;

    async fn list_all(&self) -> StoreResult<Vec<Order>>;
}

/// Invoices, at most one per order.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn add(&self, invoice: &Invoice) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Invoice>>;

    async fn find_by_order(&self, order_id: Uuid) -> StoreResult<Option<Invoice>>;
}
