use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopflow_core::StoreResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use crate::product::Product;
use crate::repository::CartRepository;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

/// A user's basket. Lines keep the order in which products were first added;
/// checkout walks them in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            lines: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn quantity_of(&self, product_id: Uuid) -> u32 {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.quantity)
            .unwrap_or(0)
    }

    /// Check that `quantity` more units of `product` may go into this cart.
    pub fn check_add(&self, product: &Product, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        if !product.is_active {
            return Err(CartError::ProductInactive(product.id));
        }
        let requested = self.quantity_of(product.id).saturating_add(quantity);
        if product.stock_qty < requested {
            return Err(CartError::InsufficientStock {
                product_id: product.id,
                requested,
                available: product.stock_qty,
            });
        }
        Ok(())
    }

    /// Increment (or create) a line without catalog checks.
    pub fn add_line(&mut self, product_id: Uuid, quantity: u32) {
        if quantity == 0 {
            return;
        }
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => self.lines.push(CartLine { product_id, quantity }),
        }
        self.updated_at = Utc::now();
    }

    /// Decrement a line. Zero removes the whole line, as does reaching zero.
    pub fn remove(&mut self, product_id: Uuid, quantity: u32) {
        let Some(idx) = self.lines.iter().position(|l| l.product_id == product_id) else {
            return;
        };
        if quantity == 0 || self.lines[idx].quantity <= quantity {
            self.lines.remove(idx);
        } else {
            self.lines[idx].quantity -= quantity;
        }
        self.updated_at = Utc::now();
    }

    /// Overwrite a line's quantity; zero or negative removes it.
    pub fn set_quantity(&mut self, product_id: Uuid, quantity: i64) {
        if quantity <= 0 {
            self.remove(product_id, 0);
            return;
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity = quantity,
            None => self.lines.push(CartLine { product_id, quantity }),
        }
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("Quantity must be positive")]
    InvalidQuantity,

    #[error("Product not available: {0}")]
    ProductInactive(Uuid),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: u32,
        available: u32,
    },
}

/// Carts held in process memory, one lock per user.
#[derive(Default)]
pub struct InMemoryCartRepository {
    carts: RwLock<HashMap<Uuid, Arc<Mutex<Cart>>>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, user_id: Uuid) -> Arc<Mutex<Cart>> {
        if let Some(slot) = self.carts.read().await.get(&user_id) {
            return slot.clone();
        }
        self.carts
            .write()
            .await
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(Cart::new(user_id))))
            .clone()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn get_or_create(&self, user_id: Uuid) -> StoreResult<Cart> {
        let slot = self.slot(user_id).await;
        let cart = slot.lock().await;
        Ok(cart.clone())
    }

    async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart> {
        let slot = self.slot(user_id).await;
        let mut cart = slot.lock().await;
        cart.add_line(product_id, quantity);
        Ok(cart.clone())
    }

    async fn remove_item(&self, user_id: Uuid, product_id: Uuid, quantity: u32) -> StoreResult<Cart> {
        let slot = self.slot(user_id).await;
        let mut cart = slot.lock().await;
        cart.remove(product_id, quantity);
        Ok(cart.clone())
    }

    async fn clear(&self, user_id: Uuid) -> StoreResult<()> {
        let slot = self.slot(user_id).await;
        slot.lock().await.clear();
        Ok(())
    }

    async fn remove_product_everywhere(&self, product_id: Uuid) -> StoreResult<usize> {
        let slots: Vec<Arc<Mutex<Cart>>> = self.carts.read().await.values().cloned().collect();
        let mut affected = 0;
        for slot in slots {
            let mut cart = slot.lock().await;
            if cart.quantity_of(product_id) > 0 {
                cart.remove(product_id, 0);
                affected += 1;
            }
        }
        Ok(affected)
    }
}
