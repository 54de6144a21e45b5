use shopflow_core::{StoreError, UserRepository};
use std::sync::Arc;
use uuid::Uuid;
use crate::cart::{Cart, CartError};
use crate::product::Product;
use crate::repository::{CartRepository, ProductRepository};

/// Browsing and backoffice maintenance of the product catalog.
pub struct CatalogService {
    products: Arc<dyn ProductRepository>,
    carts: Arc<dyn CartRepository>,
    users: Arc<dyn UserRepository>,
}

impl CatalogService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        carts: Arc<dyn CartRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self { products, carts, users }
    }

    /// Active products only, sorted by name.
    pub async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        Ok(self.products.list_active().await?)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product, CatalogError> {
        self.products.get(id).await?.ok_or(CatalogError::NotFound(id))
    }

    pub async fn add_product(&self, admin_id: Uuid, product: &Product) -> Result<(), CatalogError> {
        self.require_admin(admin_id).await?;
        if product.price_cents < 0 {
            return Err(CatalogError::InvalidPrice(product.price_cents));
        }
        self.products.add(product).await?;
        tracing::info!(product_id = %product.id, name = %product.name, "product saved");
        Ok(())
    }

    /// Toggle availability. Deactivating also strips the product from every
    /// cart; the number of carts touched is returned.
    pub async fn set_product_active(
        &self,
        admin_id: Uuid,
        product_id: Uuid,
        active: bool,
    ) -> Result<usize, CatalogError> {
        self.require_admin(admin_id).await?;
        self.products.set_active(product_id, active).await.map_err(|e| match e {
            StoreError::NotFound { .. } => CatalogError::NotFound(product_id),
            other => CatalogError::Store(other),
        })?;

        let affected = if active {
            0
        } else {
            self.carts.remove_product_everywhere(product_id).await?
        };
        tracing::info!(product_id = %product_id, active, carts_affected = affected, "product availability changed");
        Ok(affected)
    }

    async fn require_admin(&self, user_id: Uuid) -> Result<(), CatalogError> {
        match self.users.get(user_id).await? {
            Some(user) if user.is_admin => Ok(()),
            _ => Err(CatalogError::PermissionDenied),
        }
    }
}

/// Cart mutations on behalf of the owning customer.
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductRepository>,
}

impl CartService {
    pub fn new(carts: Arc<dyn CartRepository>, products: Arc<dyn ProductRepository>) -> Self {
        Self { carts, products }
    }

    pub async fn add_to_cart(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Cart, CatalogError> {
        let product = self
            .products
            .get(product_id)
            .await?
            .ok_or(CatalogError::NotFound(product_id))?;

        let cart = self.carts.get_or_create(user_id).await?;
        cart.check_add(&product, quantity)?;

        Ok(self.carts.add_item(user_id, product_id, quantity).await?)
    }

    /// `quantity == 0` drops the whole line.
    pub async fn remove_from_cart(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Cart, CatalogError> {
        Ok(self.carts.remove_item(user_id, product_id, quantity).await?)
    }

    pub async fn view_cart(&self, user_id: Uuid) -> Result<Cart, CatalogError> {
        Ok(self.carts.get_or_create(user_id).await?)
    }

    /// Current-price total in minor units. Lines whose product vanished or
    /// was deactivated are skipped.
    pub async fn cart_total(&self, user_id: Uuid) -> Result<i64, CatalogError> {
        let cart = self.carts.get_or_create(user_id).await?;
        let mut total: i64 = 0;
        for line in &cart.lines {
            if let Some(product) = self.products.get(line.product_id).await? {
                if product.is_active {
                    total = total.saturating_add(shopflow_shared::line_total(product.price_cents, line.quantity));
                }
            }
        }
        Ok(total)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Product not found: {0}")]
    NotFound(Uuid),

    #[error("Price must not be negative: {0}")]
    InvalidPrice(i64),

    #[error("Admin rights required")]
    PermissionDenied,

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
