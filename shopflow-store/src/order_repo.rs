use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopflow_core::{StoreError, StoreResult};
use shopflow_order::{
    Delivery, DeliveryStatus, Order, OrderItem, OrderRepository, OrderStatus, Timeline,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{from_db_qty, insert_error, to_db_qty};

/// Orders with their items and delivery. Every write touches the three
/// tables inside one transaction.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    version: i64,
    invoice_id: Option<Uuid>,
    payment_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    validated_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    product_id: Uuid,
    name: String,
    unit_price_cents: i64,
    quantity: i32,
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: Uuid,
    order_id: Uuid,
    carrier: String,
    tracking_number: Option<String>,
    address: String,
    status: String,
}

const SELECT_ORDER: &str = r#"
    SELECT id, user_id, status, version, invoice_id, payment_id,
           created_at, validated_at, paid_at, shipped_at, delivered_at, cancelled_at, refunded_at
    FROM orders
"#;

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::backend(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("unknown {} '{}'", what, value),
    ))
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>, delivery: Option<Delivery>) -> StoreResult<Order> {
        let status = OrderStatus::parse(&self.status).ok_or_else(|| corrupt("order status", &self.status))?;
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            items,
            status,
            timeline: Timeline {
                created_at: self.created_at,
                validated_at: self.validated_at,
                paid_at: self.paid_at,
                shipped_at: self.shipped_at,
                delivered_at: self.delivered_at,
                cancelled_at: self.cancelled_at,
                refunded_at: self.refunded_at,
            },
            delivery,
            invoice_id: self.invoice_id,
            payment_id: self.payment_id,
            version: self.version.max(0) as u64,
        })
    }
}

impl DeliveryRow {
    fn into_delivery(self) -> StoreResult<Delivery> {
        let status = DeliveryStatus::parse(&self.status).ok_or_else(|| corrupt("delivery status", &self.status))?;
        Ok(Delivery {
            id: self.id,
            order_id: self.order_id,
            carrier: self.carrier,
            tracking_number: self.tracking_number,
            address: self.address,
            status,
        })
    }
}

impl PgOrderRepository {
    /// Attach items and deliveries to a batch of order rows, keeping row order.
    async fn hydrate(&self, rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let item_rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT order_id, product_id, name, unit_price_cents, quantity
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let delivery_rows = sqlx::query_as::<_, DeliveryRow>(
            "SELECT id, order_id, carrier, tracking_number, address, status FROM deliveries WHERE order_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            items.entry(row.order_id).or_default().push(OrderItem {
                product_id: row.product_id,
                name: row.name,
                unit_price_cents: row.unit_price_cents,
                quantity: from_db_qty(row.quantity),
            });
        }

        let mut deliveries: HashMap<Uuid, Delivery> = HashMap::new();
        for row in delivery_rows {
            let delivery = row.into_delivery()?;
            deliveries.insert(delivery.order_id, delivery);
        }

        rows.into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                let delivery = deliveries.remove(&row.id);
                row.into_order(order_items, delivery)
            })
            .collect()
    }

    async fn upsert_delivery(tx: &mut Transaction<'_, Postgres>, delivery: &Delivery) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deliveries (id, order_id, carrier, tracking_number, address, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO UPDATE SET
                carrier = EXCLUDED.carrier,
                tracking_number = EXCLUDED.tracking_number,
                address = EXCLUDED.address,
                status = EXCLUDED.status
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.order_id)
        .bind(&delivery.carrier)
        .bind(&delivery.tracking_number)
        .bind(&delivery.address)
        .bind(delivery.status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn add(&self, order: &Order) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let t = &order.timeline;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, version, invoice_id, payment_id,
                                created_at, validated_at, paid_at, shipped_at, delivered_at, cancelled_at, refunded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.status.as_str())
        .bind(order.version as i64)
        .bind(order.invoice_id)
        .bind(order.payment_id)
        .bind(t.created_at)
        .bind(t.validated_at)
        .bind(t.paid_at)
        .bind(t.shipped_at)
        .bind(t.delivered_at)
        .bind(t.cancelled_at)
        .bind(t.refunded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_error(e, "order", order.id))?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, name, unit_price_cents, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(item.unit_price_cents)
            .bind(to_db_qty(item.quantity)?)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        if let Some(delivery) = &order.delivery {
            Self::upsert_delivery(&mut tx, delivery).await?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("{} WHERE id = $1", SELECT_ORDER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update(&self, order: &Order) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let t = &order.timeline;

        // Items are fixed at checkout; only status, links and stamps move.
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE orders SET
                status = $3, invoice_id = $4, payment_id = $5,
                validated_at = $6, paid_at = $7, shipped_at = $8,
                delivered_at = $9, cancelled_at = $10, refunded_at = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(order.id)
        .bind(order.version as i64)
        .bind(order.status.as_str())
        .bind(order.invoice_id)
        .bind(order.payment_id)
        .bind(t.validated_at)
        .bind(t.paid_at)
        .bind(t.shipped_at)
        .bind(t.delivered_at)
        .bind(t.cancelled_at)
        .bind(t.refunded_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        let Some(version) = version else {
            let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(order.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
            return Err(match exists {
                Some(_) => StoreError::Conflict { entity: "order", id: order.id.to_string() },
                None => StoreError::not_found("order", order.id),
            });
        };

        if let Some(delivery) = &order.delivery {
            Self::upsert_delivery(&mut tx, delivery).await?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(version.max(0) as u64)
    }

    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{} WHERE user_id = $1 ORDER BY seq", SELECT_ORDER))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        self.hydrate(rows).await
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{} ORDER BY seq", SELECT_ORDER))
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        self.hydrate(rows).await
    }
}
