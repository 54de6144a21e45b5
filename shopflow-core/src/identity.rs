use serde::{Deserialize, Serialize};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::repository::UserRepository;
use crate::{StoreError, StoreResult};

/// An account as seen by the fulfillment core: who may run backoffice
/// transitions and where parcels go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub is_admin: bool,
}

impl User {
    pub fn customer(email: &str, first_name: &str, last_name: &str, address: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            address: address.to_string(),
            is_admin: false,
        }
    }

    pub fn admin(email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            is_admin: true,
            ..Self::customer(email, first_name, last_name, "")
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn add(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate { entity: "user", id: user.email.clone() });
        }
        users.insert(user.id, user.clone());
        tracing::debug!(user_id = %user.id, admin = user.is_admin, "user registered");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}
