pub mod models;
pub mod repository;
pub mod memory;
pub mod billing;
pub mod delivery;
pub mod gateway;
pub mod error;
pub mod orchestrator;

pub use models::{Delivery, DeliveryStatus, Invoice, InvoiceLine, Order, OrderItem, OrderStatus, Timeline};
pub use repository::{InvoiceRepository, OrderRepository};
pub use memory::{InMemoryInvoiceRepository, InMemoryOrderRepository};
pub use billing::BillingService;
pub use delivery::{DeliveryCoordinator, DeliveryError};
pub use gateway::SimulatedGateway;
pub use error::{OrderError, OrderResult};
pub use orchestrator::{OrderOrchestrator, Repositories};
