use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopflow_catalog::{Cart, CartLine, CartRepository};
use shopflow_core::{StoreError, StoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{from_db_qty, to_db_qty};

/// Carts stored as one `cart_items` row per line. An empty cart has no rows.
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    product_id: Uuid,
    quantity: i32,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn get_or_create(&self, user_id: Uuid) -> StoreResult<Cart> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            "SELECT product_id, quantity, updated_at FROM cart_items WHERE user_id = $1 ORDER BY seq",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut cart = Cart::new(user_id);
        if let Some(latest) = rows.iter().map(|r| r.updated_at).max() {
            cart.updated_at = latest;
        }
        cart.lines = rows
            .into_iter()
            .map(|r| CartLine {
                product_id: r.product_id,
                quantity: from_db_qty(r.quantity),
            })
            .collect();
        Ok(cart)
    }

    async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart> {
        if quantity > 0 {
            sqlx::query(
                r#"
                INSERT INTO cart_items (user_id, product_id, quantity, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (user_id, product_id) DO UPDATE SET
                    quantity = cart_items.quantity + EXCLUDED.quantity,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(user_id)
            .bind(product_id)
            .bind(to_db_qty(quantity)?)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        }
        self.get_or_create(user_id).await
    }

    async fn remove_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart> {
        let qty = to_db_qty(quantity)?;
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let dropped = sqlx::query(
            "DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2 AND ($3 = 0 OR quantity <= $3)",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(qty)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        if dropped.rows_affected() == 0 {
            sqlx::query(
                "UPDATE cart_items SET quantity = quantity - $3, updated_at = NOW() WHERE user_id = $1 AND product_id = $2",
            )
            .bind(user_id)
            .bind(product_id)
            .bind(qty)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        self.get_or_create(user_id).await
    }

    async fn clear(&self, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn remove_product_everywhere(&self, product_id: Uuid) -> StoreResult<usize> {
        // (user_id, product_id) is the key, so one row per affected cart.
        let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1")
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(result.rows_affected() as usize)
    }
}
