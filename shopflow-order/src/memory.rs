use async_trait::async_trait;
use shopflow_core::{StoreError, StoreResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Invoice, Order};
use crate::repository::{InvoiceRepository, OrderRepository};

#[derive(Default)]
struct OrderTable {
    by_id: HashMap<Uuid, Order>,
    /// Insertion order, used for listing.
    sequence: Vec<Uuid>,
}

/// Process-local order store. The version check and the write happen under
/// the same write lock.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    table: RwLock<OrderTable>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn add(&self, order: &Order) -> StoreResult<()> {
        let mut table = self.table.write().await;
        if table.by_id.contains_key(&order.id) {
            return Err(StoreError::Duplicate {
                entity: "order",
                id: order.id.to_string(),
            });
        }
        table.sequence.push(order.id);
        table.by_id.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.table.read().await.by_id.get(&id).cloned())
    }

    async fn update(&self, order: &Order) -> StoreResult<u64> {
        let mut table = self.table.write().await;
        let stored = table
            .by_id
            .get_mut(&order.id)
            .ok_or_else(|| StoreError::not_found("order", order.id))?;

        if stored.version != order.version {
            return Err(StoreError::Conflict {
                entity: "order",
                id: order.id.to_string(),
            });
        }

        let version = order.version + 1;
        *stored = Order {
            version,
            ..order.clone()
        };
        Ok(version)
    }

    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let table = self.table.read().await;
        Ok(table
            .sequence
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        let table = self.table.read().await;
        Ok(table
            .sequence
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryInvoiceRepository {
    invoices: RwLock<HashMap<Uuid, Invoice>>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn add(&self, invoice: &Invoice) -> StoreResult<()> {
        let mut invoices = self.invoices.write().await;
        if invoices.values().any(|i| i.order_id == invoice.order_id) {
            return Err(StoreError::Duplicate {
                entity: "invoice",
                id: invoice.order_id.to_string(),
            });
        }
        invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(self.invoices.read().await.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(self
            .invoices
            .read()
            .await
            .values()
            .find(|i| i.order_id == order_id)
            .cloned())
    }
}
