//! Device registry
//!
//! One record per enrolled authenticator per account. The public key and
//! algorithm are immutable once written; only status, transports, and the
//! signature counter change afterwards. Devices are soft-revoked, never
//! deleted, so the audit trail keeps its referents.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use aegis_core::{AttestationFormat, CoseAlgorithm};

use crate::store::StorageError;

/// Device lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Revoked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "active" => Self::Active,
            _ => Self::Revoked,
        }
    }
}

/// An enrolled authenticator
#[derive(Debug, Clone)]
pub struct Device {
    pub id: Uuid,
    pub account_id: Uuid,
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub algorithm: CoseAlgorithm,
    pub aaguid: Uuid,
    pub attestation_format: AttestationFormat,
    pub raw_attestation: Vec<u8>,
    pub transports: Vec<String>,
    pub sign_count: u32,
    pub status: DeviceStatus,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a new device
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub account_id: Uuid,
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub algorithm: CoseAlgorithm,
    pub aaguid: Uuid,
    pub attestation_format: AttestationFormat,
    pub raw_attestation: Vec<u8>,
    pub transports: Vec<String>,
    pub sign_count: u32,
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An active device with this credential public key or credential id
    /// already exists. Cross-account credential reuse is always rejected.
    #[error("credential already registered")]
    CredentialInUse,

    #[error("device not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

enum Backend {
    Postgres(PgPool),
    Memory(DashMap<Uuid, Device>),
}

/// Store for enrolled authenticators
pub struct DeviceRegistry {
    backend: Backend,
}

impl DeviceRegistry {
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

    /// Register a new device.
    ///
    /// Fails with [`RegistryError::CredentialInUse`] when an active device
    /// already holds the same public key under a different account, or when
    /// the credential id is already registered.
    pub async fn register(&self, new: NewDevice) -> Result<Device, RegistryError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let conflict: Option<(Uuid,)> = sqlx::query_as(
                    r#"
                    SELECT id FROM devices
                    WHERE credential_id = $1
                       OR (public_key = $2 AND status = 'active' AND account_id <> $3)
                    LIMIT 1
                    "#,
                )
                .bind(&new.credential_id)
                .bind(&new.public_key)
                .bind(new.account_id)
                .fetch_optional(pool)
                .await
                .map_err(StorageError::from)?;
                if conflict.is_some() {
                    return Err(RegistryError::CredentialInUse);
                }

                let row: DeviceRow = sqlx::query_as(
                    r#"
                    INSERT INTO devices
                        (account_id, credential_id, public_key, algorithm, aaguid,
                         attestation_format, raw_attestation, transports, sign_count)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING id, account_id, credential_id, public_key, algorithm, aaguid,
                              attestation_format, raw_attestation, transports, sign_count,
                              status, revoked_reason, created_at
                    "#,
                )
                .bind(new.account_id)
                .bind(&new.credential_id)
                .bind(&new.public_key)
                .bind(new.algorithm.as_str())
                .bind(new.aaguid)
                .bind(new.attestation_format.as_str())
                .bind(&new.raw_attestation)
                .bind(&new.transports)
                .bind(new.sign_count as i64)
                .fetch_one(pool)
                .await
                .map_err(StorageError::from)?;

                Ok(row.into_device())
            }
            Backend::Memory(map) => {
                let duplicate = map.iter().any(|entry| {
                    let device = entry.value();
                    device.credential_id == new.credential_id
                        || (device.public_key == new.public_key
                            && device.status == DeviceStatus::Active
                            && device.account_id != new.account_id)
                });
                if duplicate {
                    return Err(RegistryError::CredentialInUse);
                }

                let device = Device {
                    id: Uuid::new_v4(),
                    account_id: new.account_id,
                    credential_id: new.credential_id,
                    public_key: new.public_key,
                    algorithm: new.algorithm,
                    aaguid: new.aaguid,
                    attestation_format: new.attestation_format,
                    raw_attestation: new.raw_attestation,
                    transports: new.transports,
                    sign_count: new.sign_count,
                    status: DeviceStatus::Active,
                    revoked_reason: None,
                    created_at: Utc::now(),
                };
                map.insert(device.id, device.clone());
                Ok(device)
            }
        }
    }

    /// Active devices for an account (used to build `allowCredentials`).
    pub async fn for_account(&self, account_id: Uuid) -> Result<Vec<Device>, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let rows: Vec<DeviceRow> = sqlx::query_as(
                    r#"
                    SELECT id, account_id, credential_id, public_key, algorithm, aaguid,
                           attestation_format, raw_attestation, transports, sign_count,
                           status, revoked_reason, created_at
                    FROM devices
                    WHERE account_id = $1 AND status = 'active'
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(account_id)
                .fetch_all(pool)
                .await?;
                Ok(rows.into_iter().map(DeviceRow::into_device).collect())
            }
            Backend::Memory(map) => {
                let mut devices: Vec<Device> = map
                    .iter()
                    .filter(|entry| {
                        let d = entry.value();
                        d.account_id == account_id && d.status == DeviceStatus::Active
                    })
                    .map(|entry| entry.value().clone())
                    .collect();
                devices.sort_by_key(|d| d.created_at);
                Ok(devices)
            }
        }
    }

    /// Look up a device by its authenticator credential id, any status.
    pub async fn find_by_credential_id(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<Device>, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row: Option<DeviceRow> = sqlx::query_as(
                    r#"
                    SELECT id, account_id, credential_id, public_key, algorithm, aaguid,
                           attestation_format, raw_attestation, transports, sign_count,
                           status, revoked_reason, created_at
                    FROM devices
                    WHERE credential_id = $1
                    "#,
                )
                .bind(credential_id)
                .fetch_optional(pool)
                .await?;
                Ok(row.map(DeviceRow::into_device))
            }
            Backend::Memory(map) => Ok(map
                .iter()
                .find(|entry| entry.value().credential_id == credential_id)
                .map(|entry| entry.value().clone())),
        }
    }

    /// Look up a device by id, any status.
    pub async fn get(&self, device_id: Uuid) -> Result<Option<Device>, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row: Option<DeviceRow> = sqlx::query_as(
                    r#"
                    SELECT id, account_id, credential_id, public_key, algorithm, aaguid,
                           attestation_format, raw_attestation, transports, sign_count,
                           status, revoked_reason, created_at
                    FROM devices
                    WHERE id = $1
                    "#,
                )
                .bind(device_id)
                .fetch_optional(pool)
                .await?;
                Ok(row.map(DeviceRow::into_device))
            }
            Backend::Memory(map) => Ok(map.get(&device_id).map(|entry| entry.value().clone())),
        }
    }

    /// Whether a device exists and is active. Consulted on every token
    /// verification, so this is a point lookup.
    pub async fn is_active(&self, device_id: Uuid) -> Result<bool, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let active: Option<bool> = sqlx::query_scalar(
                    "SELECT status = 'active' FROM devices WHERE id = $1",
                )
                .bind(device_id)
                .fetch_optional(pool)
                .await?;
                Ok(active.unwrap_or(false))
            }
            Backend::Memory(map) => Ok(map
                .get(&device_id)
                .map(|entry| entry.value().status == DeviceStatus::Active)
                .unwrap_or(false)),
        }
    }

    /// Persist the authenticator's signature counter after a successful
    /// assertion.
    pub async fn record_sign_count(
        &self,
        device_id: Uuid,
        sign_count: u32,
    ) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query("UPDATE devices SET sign_count = $2 WHERE id = $1")
                    .bind(device_id)
                    .bind(sign_count as i64)
                    .execute(pool)
                    .await?;
                Ok(())
            }
            Backend::Memory(map) => {
                if let Some(mut entry) = map.get_mut(&device_id) {
                    entry.sign_count = sign_count;
                }
                Ok(())
            }
        }
    }

    /// Revoke a device. Idempotent: revoking an already-revoked device
    /// succeeds and keeps the original reason.
    pub async fn revoke(&self, device_id: Uuid, reason: &str) -> Result<Device, RegistryError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row: Option<DeviceRow> = sqlx::query_as(
                    r#"
                    UPDATE devices
                    SET status = 'revoked',
                        revoked_reason = COALESCE(revoked_reason, $2)
                    WHERE id = $1
                    RETURNING id, account_id, credential_id, public_key, algorithm, aaguid,
                              attestation_format, raw_attestation, transports, sign_count,
                              status, revoked_reason, created_at
                    "#,
                )
                .bind(device_id)
                .bind(reason)
                .fetch_optional(pool)
                .await
                .map_err(StorageError::from)?;
                row.map(DeviceRow::into_device).ok_or(RegistryError::NotFound)
            }
            Backend::Memory(map) => {
                let mut entry = map.get_mut(&device_id).ok_or(RegistryError::NotFound)?;
                if entry.status != DeviceStatus::Revoked {
                    entry.status = DeviceStatus::Revoked;
                    entry.revoked_reason = Some(reason.to_string());
                }
                Ok(entry.value().clone())
            }
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Postgres(_) => "PostgreSQL",
            Backend::Memory(_) => "Memory",
        };
        f.debug_struct("DeviceRegistry")
            .field("backend", &backend)
            .finish()
    }
}

/// Database row for devices
#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    account_id: Uuid,
    credential_id: Vec<u8>,
    public_key: Vec<u8>,
    algorithm: String,
    aaguid: Uuid,
    attestation_format: String,
    raw_attestation: Vec<u8>,
    transports: Vec<String>,
    sign_count: i64,
    status: String,
    revoked_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl DeviceRow {
    fn into_device(self) -> Device {
        Device {
            id: self.id,
            account_id: self.account_id,
            credential_id: self.credential_id,
            public_key: self.public_key,
            algorithm: CoseAlgorithm::from_name(&self.algorithm)
                .unwrap_or(CoseAlgorithm::Es256),
            aaguid: self.aaguid,
            attestation_format: AttestationFormat::from_name(&self.attestation_format)
                .unwrap_or_default(),
            raw_attestation: self.raw_attestation,
            transports: self.transports,
            sign_count: self.sign_count as u32,
            status: DeviceStatus::from_name(&self.status),
            revoked_reason: self.revoked_reason,
            created_at: self.created_at,
        }
    }
}
