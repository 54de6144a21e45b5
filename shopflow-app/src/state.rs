use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use shopflow_catalog::{
    CartRepository, CartService, CatalogService, InMemoryCartRepository, InMemoryProductRepository,
    ProductRepository,
};
use shopflow_core::{
    InMemoryPaymentRepository, InMemoryUserRepository, PaymentGateway, PaymentRepository,
    UserRepository,
};
use shopflow_order::{
    BillingService, DeliveryCoordinator, InMemoryInvoiceRepository, InMemoryOrderRepository,
    InvoiceRepository, OrderOrchestrator, OrderRepository, Repositories, SimulatedGateway,
};
use shopflow_store::{
    Config, DbClient, PgCartRepository, PgInvoiceRepository, PgOrderRepository,
    PgPaymentRepository, PgProductRepository, PgUserRepository, StorageBackend,
};

/// Everything a front end needs, wired against one storage backend.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderOrchestrator>,
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub billing: Arc<BillingService>,
    pub users: Arc<dyn UserRepository>,
}

impl AppState {
    /// Pick the backend named in `storage.backend`. Postgres is connected
    /// and migrated before anything is wired.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Self::in_memory(config)),
            StorageBackend::Postgres => {
                let db = DbClient::new(&config.database)
                    .await
                    .context("Failed to connect to Postgres")?;
                db.migrate().await.context("Failed to run migrations")?;
                Ok(Self::postgres(&db, config))
            }
        }
    }

    pub fn in_memory(config: &Config) -> Self {
        info!("Using in-memory storage");
        Self::wire(
            config,
            Repositories {
                orders: Arc::new(InMemoryOrderRepository::new()),
                products: Arc::new(InMemoryProductRepository::new()),
                carts: Arc::new(InMemoryCartRepository::new()),
                payments: Arc::new(InMemoryPaymentRepository::new()),
                users: Arc::new(InMemoryUserRepository::new()),
            },
            Arc::new(InMemoryInvoiceRepository::new()),
        )
    }

    pub fn postgres(db: &DbClient, config: &Config) -> Self {
        info!("Using Postgres storage");
        let pool = db.pool.clone();
        let orders: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(pool.clone()));
        let products: Arc<dyn ProductRepository> = Arc::new(PgProductRepository::new(pool.clone()));
        let carts: Arc<dyn CartRepository> = Arc::new(PgCartRepository::new(pool.clone()));
        let payments: Arc<dyn PaymentRepository> = Arc::new(PgPaymentRepository::new(pool.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(pool.clone()));
        let invoices: Arc<dyn InvoiceRepository> = Arc::new(PgInvoiceRepository::new(pool));

        Self::wire(
            config,
            Repositories { orders, products, carts, payments, users },
            invoices,
        )
    }

    fn wire(config: &Config, repos: Repositories, invoices: Arc<dyn InvoiceRepository>) -> Self {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(SimulatedGateway::new(config.payment.provider.clone()));
        let delivery = DeliveryCoordinator::new(config.fulfillment.default_carrier.clone());

        let catalog = CatalogService::new(repos.products.clone(), repos.carts.clone(), repos.users.clone());
        let carts = CartService::new(repos.carts.clone(), repos.products.clone());
        let users = repos.users.clone();

        let orders = OrderOrchestrator::new(
            repos,
            BillingService::new(invoices.clone()),
            delivery,
            gateway,
        );

        Self {
            orders: Arc::new(orders),
            catalog: Arc::new(catalog),
            carts: Arc::new(carts),
            billing: Arc::new(BillingService::new(invoices)),
            users,
        }
    }
}
