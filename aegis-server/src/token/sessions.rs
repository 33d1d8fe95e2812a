//! Token session store.
//!
//! One row per issued session: which account and device it was minted for,
//! the current refresh rotation id, and the permanent revocation marker. The
//! revocation flag is the one globally shared, frequently-read structure in
//! the service - it is consulted on every introspection and every
//! authenticated request - so lookups are single-row point reads.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::StorageError;

/// A token session record.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub account_id: Uuid,
    pub device_id: Uuid,
    pub refresh_jti: Uuid,
    pub revoked: bool,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

enum Backend {
    Postgres(PgPool),
    Memory(DashMap<Uuid, SessionRecord>),
}

/// Store for token sessions and the revocation set
pub struct SessionStore {
    backend: Backend,
}

impl SessionStore {
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

    pub async fn create(&self, record: SessionRecord) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO token_sessions
                        (session_id, account_id, device_id, refresh_jti, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(record.session_id)
                .bind(record.account_id)
                .bind(record.device_id)
                .bind(record.refresh_jti)
                .bind(record.created_at)
                .execute(pool)
                .await?;
                Ok(())
            }
            Backend::Memory(map) => {
                map.insert(record.session_id, record);
                Ok(())
            }
        }
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<SessionRecord>, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row: Option<SessionRow> = sqlx::query_as(
                    r#"
                    SELECT session_id, account_id, device_id, refresh_jti,
                           revoked, revoked_reason, created_at
                    FROM token_sessions
                    WHERE session_id = $1
                    "#,
                )
                .bind(session_id)
                .fetch_optional(pool)
                .await?;
                Ok(row.map(SessionRow::into_record))
            }
            Backend::Memory(map) => Ok(map.get(&session_id).map(|e| e.value().clone())),
        }
    }

    /// Rotate the refresh id, conditional on the presented id still being
    /// current. Returns `false` when the session is unknown, revoked, or the
    /// expected id has already been superseded - the caller treats that as a
    /// replay signal.
    pub async fn rotate_refresh(
        &self,
        session_id: Uuid,
        expected_jti: Uuid,
        new_jti: Uuid,
    ) -> Result<bool, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    UPDATE token_sessions
                    SET refresh_jti = $3
                    WHERE session_id = $1 AND refresh_jti = $2 AND revoked = FALSE
                    "#,
                )
                .bind(session_id)
                .bind(expected_jti)
                .bind(new_jti)
                .execute(pool)
                .await?;
                Ok(result.rows_affected() > 0)
            }
            Backend::Memory(map) => {
                if let Some(mut entry) = map.get_mut(&session_id) {
                    if !entry.revoked && entry.refresh_jti == expected_jti {
                        entry.refresh_jti = new_jti;
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Revoke a session. Permanent; there is no un-revoke. Idempotent.
    pub async fn revoke(&self, session_id: Uuid, reason: &str) -> Result<bool, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    UPDATE token_sessions
                    SET revoked = TRUE,
                        revoked_reason = COALESCE(revoked_reason, $2)
                    WHERE session_id = $1
                    "#,
                )
                .bind(session_id)
                .bind(reason)
                .execute(pool)
                .await?;
                Ok(result.rows_affected() > 0)
            }
            Backend::Memory(map) => {
                if let Some(mut entry) = map.get_mut(&session_id) {
                    if !entry.revoked {
                        entry.revoked = true;
                        entry.revoked_reason = Some(reason.to_string());
                    }
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Revoke every session bound to a device. Used when a device is
    /// revoked so its tokens die with it.
    pub async fn revoke_for_device(
        &self,
        device_id: Uuid,
        reason: &str,
    ) -> Result<u64, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    UPDATE token_sessions
                    SET revoked = TRUE,
                        revoked_reason = COALESCE(revoked_reason, $2)
                    WHERE device_id = $1 AND revoked = FALSE
                    "#,
                )
                .bind(device_id)
                .bind(reason)
                .execute(pool)
                .await?;
                Ok(result.rows_affected())
            }
            Backend::Memory(map) => {
                let mut count = 0u64;
                for mut entry in map.iter_mut() {
                    if entry.device_id == device_id && !entry.revoked {
                        entry.revoked = true;
                        entry.revoked_reason = Some(reason.to_string());
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Postgres(_) => "PostgreSQL",
            Backend::Memory(_) => "Memory",
        };
        f.debug_struct("SessionStore")
            .field("backend", &backend)
            .finish()
    }
}

/// Database row for token sessions
#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: Uuid,
    account_id: Uuid,
    device_id: Uuid,
    refresh_jti: Uuid,
    revoked: bool,
    revoked_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_record(self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id,
            account_id: self.account_id,
            device_id: self.device_id,
            refresh_jti: self.refresh_jti,
            revoked: self.revoked,
            revoked_reason: self.revoked_reason,
            created_at: self.created_at,
        }
    }
}
