use async_trait::async_trait;
use uuid::Uuid;
use crate::identity::User;
use crate::payment::Payment;
use crate::StoreResult;

/// Read access to accounts: admin checks and delivery address lookup.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn add(&self, user: &User) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<User>>;
}

/// Append-only payment journal. Records are never mutated once added.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn add(&self, payment: &Payment) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>>;

    /// All attempts for an order, oldest first.
    async fn list_by_order(&self, order_id: Uuid) -> StoreResult<Vec<Payment>>;
}
