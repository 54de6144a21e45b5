use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopflow_core::{StoreError, StoreResult};
use shopflow_order::{Invoice, InvoiceLine, InvoiceRepository};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{from_db_qty, insert_error, to_db_qty};

pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    total_cents: i64,
    issued_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct InvoiceLineRow {
    product_id: Uuid,
    name: String,
    unit_price_cents: i64,
    quantity: i32,
}

impl PgInvoiceRepository {
    async fn find(&self, column: &str, value: Uuid) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT id, order_id, user_id, total_cents, issued_at FROM invoices WHERE {} = $1",
            column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, InvoiceLineRow>(
            r#"
            SELECT product_id, name, unit_price_cents, quantity
            FROM invoice_lines
            WHERE invoice_id = $1
            ORDER BY position
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(Some(Invoice {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            lines: lines
                .into_iter()
                .map(|l| InvoiceLine {
                    product_id: l.product_id,
                    name: l.name,
                    unit_price_cents: l.unit_price_cents,
                    quantity: from_db_qty(l.quantity),
                })
                .collect(),
            total_cents: row.total_cents,
            issued_at: row.issued_at,
        }))
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    async fn add(&self, invoice: &Invoice) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        sqlx::query(
            r#"
            INSERT INTO invoices (id, order_id, user_id, total_cents, issued_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.order_id)
        .bind(invoice.user_id)
        .bind(invoice.total_cents)
        .bind(invoice.issued_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_error(e, "invoice", invoice.order_id))?;

        for (position, line) in invoice.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_lines (invoice_id, position, product_id, name, unit_price_cents, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(invoice.id)
            .bind(position as i32)
            .bind(line.product_id)
            .bind(&line.name)
            .bind(line.unit_price_cents)
            .bind(to_db_qty(line.quantity)?)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Invoice>> {
        self.find("id", id).await
    }

    async fn find_by_order(&self, order_id: Uuid) -> StoreResult<Option<Invoice>> {
        self.find("order_id", order_id).await
    }
}
