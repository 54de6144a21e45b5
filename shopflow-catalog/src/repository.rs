use async_trait::async_trait;
use uuid::Uuid;
use shopflow_core::StoreResult;
use crate::cart::Cart;
use crate::product::Product;

/// Product catalog and the only write path for stock quantity.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Insert or overwrite a product, including its stock level.
    async fn add(&self, product: &Product) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Product>>;

    async fn list_active(&self) -> StoreResult<Vec<Product>>;

    async fn list_all(&self) -> StoreResult<Vec<Product>>;

    async fn set_active(&self, id: Uuid, active: bool) -> StoreResult<()>;

    /// Atomically decrement stock by `quantity` if at least that much is
    /// available. Fails with `StoreError::InsufficientStock` otherwise and
    /// leaves stock untouched.
    async fn reserve_stock(&self, id: Uuid, quantity: u32) -> StoreResult<()>;

    /// Unconditionally add `quantity` back to stock.
    async fn release_stock(&self, id: Uuid, quantity: u32) -> StoreResult<()>;
}

/// Per-user shopping carts.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn get_or_create(&self, user_id: Uuid) -> StoreResult<Cart>;

    /// Increment the line for `product_id` by `quantity`, creating it if absent.
    async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart>;

    /// Decrement a line; `quantity == 0` or a result at or below zero drops it.
    async fn remove_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart>;

    async fn clear(&self, user_id: Uuid) -> StoreResult<()>;

    /// Drop a product from every cart, returning how many carts changed.
    async fn remove_product_everywhere(&self, product_id: Uuid) -> StoreResult<usize>;
}
