pub mod app_config;
pub mod database;
pub mod catalog_repo;
pub mod cart_repo;
pub mod order_repo;
pub mod invoice_repo;
pub mod payment_repo;
pub mod user_repo;

pub use app_config::{Config, StorageBackend};
pub use database::DbClient;
pub use catalog_repo::PgProductRepository;
pub use cart_repo::PgCartRepository;
pub use order_repo::PgOrderRepository;
pub use invoice_repo::PgInvoiceRepository;
pub use payment_repo::PgPaymentRepository;
pub use user_repo::PgUserRepository;

use shopflow_core::{StoreError, StoreResult};

/// Maps a unique-key violation to `Duplicate`, anything else to `Backend`.
pub(crate) fn insert_error(err: sqlx::Error, entity: &'static str, id: impl ToString) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate {
            entity,
            id: id.to_string(),
        },
        _ => StoreError::backend(err),
    }
}

/// Quantities are `u32` in the domain and `INTEGER` in Postgres.
pub(crate) fn to_db_qty(quantity: u32) -> StoreResult<i32> {
    i32::try_from(quantity).map_err(StoreError::backend)
}

pub(crate) fn from_db_qty(quantity: i32) -> u32 {
    u32::try_from(quantity).unwrap_or(0)
}
