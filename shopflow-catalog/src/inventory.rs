use async_trait::async_trait;
use shopflow_core::{StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::product::Product;
use crate::repository::ProductRepository;

/// One catalog row. Stock and the active flag live in atomics so that
/// reservations never take a lock.
struct StockEntry {
    details: StdRwLock<Product>,
    stock: AtomicU32,
    active: AtomicBool,
}

impl StockEntry {
    fn new(product: &Product) -> Self {
        Self {
            details: StdRwLock::new(product.clone()),
            stock: AtomicU32::new(product.stock_qty),
            active: AtomicBool::new(product.is_active),
        }
    }

    fn snapshot(&self) -> Product {
        let mut product = match self.details.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        product.stock_qty = self.stock.load(Ordering::Acquire);
        product.is_active = self.active.load(Ordering::Acquire);
        product
    }

    fn overwrite(&self, product: &Product) {
        match self.details.write() {
            Ok(mut guard) => *guard = product.clone(),
            Err(poisoned) => *poisoned.into_inner() = product.clone(),
        }
        self.stock.store(product.stock_qty, Ordering::Release);
        self.active.store(product.is_active, Ordering::Release);
    }
}

/// In-memory catalog. The map lock is only taken for writing when a new
/// product is inserted; stock moves with compare-and-swap on the entry.
#[derive(Default)]
pub struct InMemoryProductRepository {
    inventory: RwLock<HashMap<Uuid, Arc<StockEntry>>>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: Uuid) -> Option<Arc<StockEntry>> {
        self.inventory.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn add(&self, product: &Product) -> StoreResult<()> {
        if let Some(entry) = self.entry(product.id).await {
            entry.overwrite(product);
            return Ok(());
        }
        self.inventory
            .write()
            .await
            .entry(product.id)
            .and_modify(|e| e.overwrite(product))
            .or_insert_with(|| Arc::new(StockEntry::new(product)));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.entry(id).await.map(|e| e.snapshot()))
    }

    async fn list_active(&self) -> StoreResult<Vec<Product>> {
        let mut products: Vec<Product> = self
            .inventory
            .read()
            .await
            .values()
            .map(|e| e.snapshot())
            .filter(|p| p.is_active)
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn list_all(&self) -> StoreResult<Vec<Product>> {
        let mut products: Vec<Product> = self
            .inventory
            .read()
            .await
            .values()
            .map(|e| e.snapshot())
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> StoreResult<()> {
        let entry = self.entry(id).await.ok_or_else(|| StoreError::not_found("product", id))?;
        entry.active.store(active, Ordering::Release);
        Ok(())
    }

    async fn reserve_stock(&self, id: Uuid, quantity: u32) -> StoreResult<()> {
        let entry = self.entry(id).await.ok_or_else(|| StoreError::not_found("product", id))?;

        if !entry.active.load(Ordering::Acquire) {
            return Err(StoreError::Inactive { product_id: id });
        }

        entry
            .stock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                available.checked_sub(quantity)
            })
            .map_err(|_| StoreError::InsufficientStock { product_id: id, requested: quantity })?;

        tracing::debug!(product_id = %id, quantity, "stock reserved");
        Ok(())
    }

    async fn release_stock(&self, id: Uuid, quantity: u32) -> StoreResult<()> {
        let Some(entry) = self.entry(id).await else {
            tracing::warn!(product_id = %id, quantity, "release for unknown product ignored");
            return Ok(());
        };

        // Infallible: the closure always returns Some.
        let _ = entry
            .stock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                Some(available.saturating_add(quantity))
            });

        tracing::debug!(product_id = %id, quantity, "stock released");
        Ok(())
    }
}
