pub mod product;
pub mod cart;
pub mod inventory;
pub mod repository;
pub mod service;

pub use product::Product;
pub use cart::{Cart, CartError, CartLine, InMemoryCartRepository};
pub use inventory::InMemoryProductRepository;
pub use repository::{CartRepository, ProductRepository};
pub use service::{CartService, CatalogError, CatalogService};
