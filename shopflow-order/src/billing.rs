use chrono::Utc;
use shopflow_core::StoreResult;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::{Invoice, InvoiceLine, Order};
use crate::repository::InvoiceRepository;

/// Issues invoices for paid orders.
pub struct BillingService {
    invoices: Arc<dyn InvoiceRepository>,
}

impl BillingService {
    pub fn new(invoices: Arc<dyn InvoiceRepository>) -> Self {
        Self { invoices }
    }

    /// Build and store the invoice for `order`. Lines mirror the order
    /// snapshot. Issuing twice returns the invoice already on file.
    pub async fn issue_invoice(&self, order: &Order) -> StoreResult<Invoice> {
        if let Some(existing) = self.invoices.find_by_order(order.id).await? {
            return Ok(existing);
        }

        let lines: Vec<InvoiceLine> = order
            .items
            .iter()
            .map(|item| InvoiceLine {
                product_id: item.product_id,
                name: item.name.clone(),
                unit_price_cents: item.unit_price_cents,
                quantity: item.quantity,
            })
            .collect();

        let invoice = Invoice {
            id: Uuid::new_v4(),
            order_id: order.id,
            user_id: order.user_id,
            lines,
            total_cents: order.total_cents(),
            issued_at: Utc::now(),
        };
        self.invoices.add(&invoice).await?;

        info!(
            order_id = %order.id,
            invoice_id = %invoice.id,
            total = %shopflow_shared::format_minor_units(invoice.total_cents),
            "Invoice issued"
        );
        Ok(invoice)
    }

    pub async fn get_invoice(&self, id: Uuid) -> StoreResult<Option<Invoice>> {
        self.invoices.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryInvoiceRepository;
    use crate::models::OrderItem;

    fn order() -> Order {
        Order::new(
            Uuid::new_v4(),
            vec![
                OrderItem {
                    product_id: Uuid::new_v4(),
                    name: "Keyboard".to_string(),
                    unit_price_cents: 1000,
                    quantity: 2,
                },
                OrderItem {
                    product_id: Uuid::new_v4(),
                    name: "Mouse".to_string(),
                    unit_price_cents: 2000,
                    quantity: 1,
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_invoice_mirrors_order() {
        let billing = BillingService::new(Arc::new(InMemoryInvoiceRepository::new()));
        let order = order();

        let invoice = billing.issue_invoice(&order).await.unwrap();

        assert_eq!(invoice.order_id, order.id);
        assert_eq!(invoice.user_id, order.user_id);
        assert_eq!(invoice.total_cents, 4000);
        assert_eq!(invoice.lines.len(), 2);
        assert_eq!(invoice.lines[0].name, "Keyboard");
        assert_eq!(billing.get_invoice(invoice.id).await.unwrap(), Some(invoice));
    }

    #[tokio::test]
    async fn test_issue_is_idempotent_per_order() {
        let billing = BillingService::new(Arc::new(InMemoryInvoiceRepository::new()));
        let order = order();

        let first = billing.issue_invoice(&order).await.unwrap();
        let second = billing.issue_invoice(&order).await.unwrap();
        assert_eq!(first.id, second.id);
    }
}
