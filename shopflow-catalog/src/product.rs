use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sellable catalog entry. Prices are minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub stock_qty: u32,
    pub is_active: bool,
}

impl Product {
    pub fn new(name: &str, description: &str, price_cents: i64, stock_qty: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            price_cents,
            stock_qty,
            is_active: true,
        }
    }

    /// Active and holding at least `quantity` units.
    pub fn can_supply(&self, quantity: u32) -> bool {
        self.is_active && self.stock_qty >= quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_supply() {
        let mut mug = Product::new("Mug", "Stoneware mug", 1200, 3);
        assert!(mug.can_supply(3));
        assert!(!mug.can_supply(4));

        mug.is_active = false;
        assert!(!mug.can_supply(1));
    }
}
