//! Account entity and store
//!
//! Accounts are the subjects the enrollment and authentication flows hang
//! off. The wider storefront owns richer profile data; the auth core only
//! needs identity, email, and role.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::StorageError;

/// Account role consumed by `require_role`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Storefront customer (default for all new accounts)
    #[default]
    Customer,
    /// Admin console access
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Admin => "admin",
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "admin" => Role::Admin,
            _ => Role::Customer,
        }
    }
}

/// Account entity
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Account {
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[schema(example = "Alice")]
    pub display_name: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    #[schema(value_type = String, example = "2026-08-01T10:00:00Z")]
    pub created_at: DateTime<Utc>,
}

enum Backend {
    Postgres(PgPool),
    Memory(DashMap<Uuid, Account>),
}

/// Store for account records
pub struct AccountStore {
    backend: Backend,
}

impl AccountStore {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(DashMap::new()),
        }
    }

    /// Find an account by email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let account = sqlx::query_as::<_, Account>(
                    r#"
                    SELECT id, email, display_name, role, created_at
                    FROM accounts
                    WHERE email = $1
                    "#,
                )
                .bind(email)
                .fetch_optional(pool)
                .await?;
                Ok(account)
            }
            Backend::Memory(map) => Ok(map
                .iter()
                .find(|entry| entry.value().email == email)
                .map(|entry| entry.value().clone())),
        }
    }

    /// Find an account by id
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let account = sqlx::query_as::<_, Account>(
                    r#"
                    SELECT id, email, display_name, role, created_at
                    FROM accounts
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(pool)
                .await?;
                Ok(account)
            }
            Backend::Memory(map) => Ok(map.get(&id).map(|entry| entry.value().clone())),
        }
    }

    /// Find an account by email, creating it with the default role when it
    /// does not exist yet. An existing account keeps its display name.
    pub async fn find_or_create(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<Account, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let account = sqlx::query_as::<_, Account>(
                    r#"
                    INSERT INTO accounts (email, display_name)
                    VALUES ($1, $2)
                    ON CONFLICT (email)
                    DO UPDATE SET email = EXCLUDED.email
                    RETURNING id, email, display_name, role, created_at
                    "#,
                )
                .bind(email)
                .bind(display_name)
                .fetch_one(pool)
                .await?;
                Ok(account)
            }
            Backend::Memory(map) => {
                if let Some(existing) = self.find_by_email(email).await? {
                    return Ok(existing);
                }
                let account = Account {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    display_name: display_name.map(|s| s.to_string()),
                    role: Role::default(),
                    created_at: Utc::now(),
                };
                map.insert(account.id, account.clone());
                Ok(account)
            }
        }
    }

    /// Change an account's role (admin operation)
    pub async fn set_role(&self, id: Uuid, role: Role) -> Result<bool, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query("UPDATE accounts SET role = $2 WHERE id = $1")
                    .bind(id)
                    .bind(role.as_str())
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            }
            Backend::Memory(map) => {
                if let Some(mut entry) = map.get_mut(&id) {
                    entry.role = role;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

impl std::fmt::Debug for AccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Postgres(_) => "PostgreSQL",
            Backend::Memory(_) => "Memory",
        };
        f.debug_struct("AccountStore")
            .field("backend", &backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_conversion() {
        assert_eq!(Role::from("admin".to_string()), Role::Admin);
        assert_eq!(Role::from("customer".to_string()), Role::Customer);
        assert_eq!(Role::from("garbage".to_string()), Role::Customer);
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let store = AccountStore::in_memory();
        let first = store
            .find_or_create("alice@example.com", Some("Alice"))
            .await
            .unwrap();
        let second = store
            .find_or_create("alice@example.com", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_set_role() {
        let store = AccountStore::in_memory();
        let account = store.find_or_create("ops@example.com", None).await.unwrap();
        assert_eq!(account.role, Role::Customer);

        assert!(store.set_role(account.id, Role::Admin).await.unwrap());
        let reloaded = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(reloaded.role, Role::Admin);
    }
}
