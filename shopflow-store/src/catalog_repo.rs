use async_trait::async_trait;
use shopflow_catalog::{Product, ProductRepository};
use shopflow_core::{StoreError, StoreResult};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{from_db_qty, to_db_qty};

pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: String,
    price_cents: i64,
    stock_qty: i32,
    is_active: bool,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            description: row.description,
            price_cents: row.price_cents,
            stock_qty: from_db_qty(row.stock_qty),
            is_active: row.is_active,
        }
    }
}

const SELECT_PRODUCT: &str =
    "SELECT id, name, description, price_cents, stock_qty, is_active FROM products";

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn add(&self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price_cents, stock_qty, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                price_cents = EXCLUDED.price_cents,
                stock_qty = EXCLUDED.stock_qty,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price_cents)
        .bind(to_db_qty(product.stock_qty)?)
        .bind(product.is_active)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!("{} WHERE id = $1", SELECT_PRODUCT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(row.map(Product::from))
    }

    async fn list_active(&self) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "{} WHERE is_active = TRUE ORDER BY name",
            SELECT_PRODUCT
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!("{} ORDER BY name", SELECT_PRODUCT))
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE products SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("product", id));
        }
        Ok(())
    }

    async fn reserve_stock(&self, id: Uuid, quantity: u32) -> StoreResult<()> {
        let qty = to_db_qty(quantity)?;
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_qty = stock_qty - $2
            WHERE id = $1 AND is_active = TRUE AND stock_qty >= $2
            "#,
        )
        .bind(id)
        .bind(qty)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if result.rows_affected() == 1 {
            debug!(product_id = %id, quantity, "stock reserved");
            return Ok(());
        }

        // Nothing matched; work out which condition failed.
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        match active {
            None => Err(StoreError::not_found("product", id)),
            Some(false) => Err(StoreError::Inactive { product_id: id }),
            Some(true) => Err(StoreError::InsufficientStock { product_id: id, requested: quantity }),
        }
    }

    async fn release_stock(&self, id: Uuid, quantity: u32) -> StoreResult<()> {
        let result = sqlx::query("UPDATE products SET stock_qty = stock_qty + $2 WHERE id = $1")
            .bind(id)
            .bind(to_db_qty(quantity)?)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            warn!(product_id = %id, quantity, "release for unknown product ignored");
        }
        Ok(())
    }
}
