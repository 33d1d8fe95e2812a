//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use aegis_core::RelyingParty;

use crate::account::AccountStore;
use crate::audit::AuditLog;
use crate::challenge::ChallengeStore;
use crate::config::Config;
use crate::device::DeviceRegistry;
use crate::error::ApiError;
use crate::store::Database;
use crate::token::{SessionStore, TokenKeys, TokenService};

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Relying Party policy for ceremony verification
    pub rp: Arc<RelyingParty>,
    /// Account store
    pub accounts: Arc<AccountStore>,
    /// Single-use ceremony challenges
    pub challenges: Arc<ChallengeStore>,
    /// Enrolled authenticators
    pub devices: Arc<DeviceRegistry>,
    /// Token issuance and verification
    pub tokens: Arc<TokenService>,
    /// Append-only security audit log
    pub audit: Arc<AuditLog>,
}

impl AppState {
    /// Build state with in-memory stores (development and tests).
    pub fn in_memory(config: Config, keys: TokenKeys) -> Self {
        let devices = Arc::new(DeviceRegistry::in_memory());
        let tokens = Arc::new(TokenService::new(
            keys,
            SessionStore::in_memory(),
            devices.clone(),
            &config.issuer,
            &config.audience,
            config.access_ttl_secs,
            config.refresh_ttl_secs,
        ));

        Self {
            rp: Arc::new(config.relying_party()),
            accounts: Arc::new(AccountStore::in_memory()),
            challenges: Arc::new(ChallengeStore::in_memory(config.challenge_ttl_secs)),
            devices,
            tokens,
            audit: Arc::new(AuditLog::in_memory()),
            config: Arc::new(config),
        }
    }

    /// Build state from the environment.
    ///
    /// Uses PostgreSQL when `DATABASE_URL` is set, otherwise falls back to
    /// in-memory stores (state is lost on restart). The token signing key
    /// pair is mandatory either way - an auth service without its signing
    /// key must not start.
    pub async fn from_env(config: Config) -> Result<Self, ApiError> {
        // Ceremony verification compares origins by exact string equality,
        // so a malformed configured origin would reject every client.
        url::Url::parse(&config.rp_origin).map_err(|e| {
            ApiError::internal(format!("WEBAUTHN_RP_ORIGIN is not a valid URL: {e}"))
        })?;

        let private_pem = config.signing_key_pem.as_ref().ok_or_else(|| {
            ApiError::internal("TOKEN_SIGNING_KEY(_FILE) is not configured; refusing to start")
        })?;
        let public_pem = config.signing_public_key_pem.as_ref().ok_or_else(|| {
            ApiError::internal(
                "TOKEN_SIGNING_PUBLIC_KEY(_FILE) is not configured; refusing to start",
            )
        })?;

        let keys = TokenKeys::from_rsa_pems(
            &config.signing_kid,
            private_pem.as_bytes(),
            public_pem.as_bytes(),
        )
        .map_err(|e| ApiError::internal(format!("Failed to load signing keys: {e}")))?;

        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => {
                tracing::info!("Using PostgreSQL storage");
                let db = Database::connect(&url)
                    .await
                    .map_err(|e| ApiError::internal(format!("Database connection failed: {e}")))?;
                db.migrate()
                    .await
                    .map_err(|e| ApiError::internal(format!("Database migration failed: {e}")))?;

                let devices = Arc::new(DeviceRegistry::postgres(db.pool()));
                let tokens = Arc::new(TokenService::new(
                    keys,
                    SessionStore::postgres(db.pool()),
                    devices.clone(),
                    &config.issuer,
                    &config.audience,
                    config.access_ttl_secs,
                    config.refresh_ttl_secs,
                ));

                Ok(Self {
                    rp: Arc::new(config.relying_party()),
                    accounts: Arc::new(AccountStore::postgres(db.pool())),
                    challenges: Arc::new(ChallengeStore::postgres(
                        db.pool(),
                        config.challenge_ttl_secs,
                    )),
                    devices,
                    tokens,
                    audit: Arc::new(AuditLog::postgres(db.pool())),
                    config: Arc::new(config),
                })
            }
            _ => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage");
                Ok(Self::in_memory(config, keys))
            }
        }
    }
}
