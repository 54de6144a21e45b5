use async_trait::async_trait;
use shopflow_core::{StoreError, StoreResult, User, UserRepository};
use sqlx::PgPool;
use uuid::Uuid;

use crate::insert_error;

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    address: String,
    is_admin: bool,
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn add(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, first_name, last_name, address, is_admin)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.address)
        .bind(user.is_admin)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "user", &user.email))?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, first_name, last_name, address, is_admin FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(row.map(|r| User {
            id: r.id,
            email: r.email,
            first_name: r.first_name,
            last_name: r.last_name,
            address: r.address,
            is_admin: r.is_admin,
        }))
    }
}
