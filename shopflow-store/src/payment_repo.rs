use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopflow_core::{Payment, PaymentRepository, StoreError, StoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::insert_error;

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    amount_cents: i64,
    provider: String,
    provider_ref: Option<String>,
    succeeded: bool,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount_cents: row.amount_cents,
            provider: row.provider,
            provider_ref: row.provider_ref,
            succeeded: row.succeeded,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
        }
    }
}

const SELECT_PAYMENT: &str = r#"
    SELECT id, order_id, user_id, amount_cents, provider, provider_ref, succeeded, failure_reason, created_at
    FROM payments
"#;

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn add(&self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, user_id, amount_cents, provider, provider_ref, succeeded, failure_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.user_id)
        .bind(payment.amount_cents)
        .bind(&payment.provider)
        .bind(&payment.provider_ref)
        .bind(payment.succeeded)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "payment", payment.id))?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!("{} WHERE id = $1", SELECT_PAYMENT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(row.map(Payment::from))
    }

    async fn list_by_order(&self, order_id: Uuid) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!("{} WHERE order_id = $1 ORDER BY seq", SELECT_PAYMENT))
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(rows.into_iter().map(Payment::from).collect())
    }
}
