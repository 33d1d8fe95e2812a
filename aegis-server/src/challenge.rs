//! Challenge store
//!
//! Issues and consumes the short-lived, single-use challenges that anchor
//! every enrollment and authentication ceremony. The consume operation is the
//! one hard concurrency invariant in the service: two concurrent consumers of
//! the same challenge id must see exactly one success.
//!
//! The PostgreSQL backend enforces this with a conditional UPDATE on the
//! `consumed` flag; the in-memory backend relies on the atomicity of a
//! single-winner map removal. Expiry is enforced at consume time regardless
//! of whether the housekeeping sweep has run.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use aegis_core::{generate_nonce, NONCE_LEN};

use crate::store::StorageError;

/// What a challenge was issued for. A challenge issued for one purpose can
/// never finish the other flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Registration,
    Authentication,
}

impl ChallengePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "registration" => Self::Registration,
            _ => Self::Authentication,
        }
    }
}

/// Challenge errors. Unknown, expired, and already-consumed ids all collapse
/// into [`ChallengeError::InvalidOrExpired`] so callers cannot leak
/// enumeration signals.
#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("invalid or expired challenge")]
    InvalidOrExpired,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A freshly issued challenge.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub id: Uuid,
    pub nonce: [u8; NONCE_LEN],
    pub expires_at: DateTime<Utc>,
}

/// The result of consuming a challenge.
#[derive(Debug, Clone)]
pub struct ConsumedChallenge {
    pub account_id: Uuid,
    pub purpose: ChallengePurpose,
    pub nonce: Vec<u8>,
}

struct MemoryEntry {
    account_id: Uuid,
    purpose: ChallengePurpose,
    nonce: Vec<u8>,
    expires_at: DateTime<Utc>,
}

enum Backend {
    Postgres(PgPool),
    Memory(DashMap<Uuid, MemoryEntry>),
}

/// Store for single-use ceremony challenges
pub struct ChallengeStore {
    backend: Backend,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn postgres(pool: PgPool, ttl_secs: u64) -> Self {
        Self {
            backend: Backend::Postgres(pool),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn in_memory(ttl_secs: u64) -> Self {
        Self {
            backend: Backend::Memory(DashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Issue a new challenge for an account and purpose.
    ///
    /// The returned id is opaque and distinct from the nonce bytes the
    /// authenticator signs over.
    pub async fn issue(
        &self,
        account_id: Uuid,
        purpose: ChallengePurpose,
    ) -> Result<IssuedChallenge, StorageError> {
        let id = Uuid::new_v4();
        let nonce = generate_nonce();
        let now = Utc::now();
        let expires_at = now + self.ttl;

        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO challenges (id, account_id, purpose, nonce, created_at, expires_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(id)
                .bind(account_id)
                .bind(purpose.as_str())
                .bind(nonce.as_slice())
                .bind(now)
                .bind(expires_at)
                .execute(pool)
                .await?;
            }
            Backend::Memory(map) => {
                map.insert(
                    id,
                    MemoryEntry {
                        account_id,
                        purpose,
                        nonce: nonce.to_vec(),
                        expires_at,
                    },
                );
            }
        }

        tracing::debug!(
            challenge_id = %id,
            account_id = %account_id,
            purpose = purpose.as_str(),
            "Challenge issued"
        );

        Ok(IssuedChallenge {
            id,
            nonce,
            expires_at,
        })
    }

    /// Consume a challenge exactly once.
    ///
    /// Atomic with respect to concurrent callers: the PostgreSQL backend
    /// performs a conditional update on the `consumed` flag, and the memory
    /// backend hands the entry to exactly one remover. Expired and unknown
    /// ids fail identically.
    pub async fn consume(&self, id: Uuid) -> Result<ConsumedChallenge, ChallengeError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row: Option<(Uuid, String, Vec<u8>)> = sqlx::query_as(
                    r#"
                    UPDATE challenges
                    SET consumed = TRUE
                    WHERE id = $1 AND consumed = FALSE AND expires_at > NOW()
                    RETURNING account_id, purpose, nonce
                    "#,
                )
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(StorageError::from)?;

                match row {
                    Some((account_id, purpose, nonce)) => Ok(ConsumedChallenge {
                        account_id,
                        purpose: ChallengePurpose::from_name(&purpose),
                        nonce,
                    }),
                    None => Err(ChallengeError::InvalidOrExpired),
                }
            }
            Backend::Memory(map) => {
                let (_, entry) = map.remove(&id).ok_or(ChallengeError::InvalidOrExpired)?;
                if entry.expires_at <= Utc::now() {
                    return Err(ChallengeError::InvalidOrExpired);
                }
                Ok(ConsumedChallenge {
                    account_id: entry.account_id,
                    purpose: entry.purpose,
                    nonce: entry.nonce,
                })
            }
        }
    }

    /// Delete expired challenges, consumed or not.
    ///
    /// Housekeeping only - correctness never depends on this running, since
    /// `consume` checks expiry itself.
    pub async fn sweep_expired(&self) -> Result<u64, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM challenges WHERE expires_at <= NOW()")
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected())
            }
            Backend::Memory(map) => {
                let now = Utc::now();
                let before = map.len();
                map.retain(|_, entry| entry.expires_at > now);
                Ok((before - map.len()) as u64)
            }
        }
    }

    /// Number of pending (unconsumed, tracked) challenges.
    pub async fn pending_count(&self) -> Result<u64, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let count: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM challenges WHERE consumed = FALSE")
                        .fetch_one(pool)
                        .await?;
                Ok(count as u64)
            }
            Backend::Memory(map) => Ok(map.len() as u64),
        }
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Postgres(_) => "PostgreSQL".to_string(),
            Backend::Memory(map) => format!("Memory({} pending)", map.len()),
        };
        f.debug_struct("ChallengeStore")
            .field("backend", &backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_consume_succeeds_exactly_once() {
        let store = ChallengeStore::in_memory(60);
        let issued = store
            .issue(Uuid::new_v4(), ChallengePurpose::Registration)
            .await
            .unwrap();

        let consumed = store.consume(issued.id).await.unwrap();
        assert_eq!(consumed.purpose, ChallengePurpose::Registration);
        assert_eq!(consumed.nonce, issued.nonce.to_vec());

        let err = store.consume(issued.id).await.unwrap_err();
        assert!(matches!(err, ChallengeError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_concurrent_consume_has_single_winner() {
        let store = Arc::new(ChallengeStore::in_memory(60));
        let issued = store
            .issue(Uuid::new_v4(), ChallengePurpose::Authentication)
            .await
            .unwrap();

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.consume(issued.id).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.consume(issued.id).await }
        });

        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        let successes = [ra.is_ok(), rb.is_ok()].iter().filter(|&&ok| ok).count();
        assert_eq!(successes, 1, "exactly one concurrent consume may succeed");
    }

    #[tokio::test]
    async fn test_expired_challenge_fails_consumption() {
        let store = ChallengeStore::in_memory(0);
        let issued = store
            .issue(Uuid::new_v4(), ChallengePurpose::Registration)
            .await
            .unwrap();

        let err = store.consume(issued.id).await.unwrap_err();
        assert!(matches!(err, ChallengeError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_unknown_id_indistinguishable_from_expired() {
        let store = ChallengeStore::in_memory(60);
        let unknown = store.consume(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(unknown.to_string(), "invalid or expired challenge");

        let expired_store = ChallengeStore::in_memory(0);
        let issued = expired_store
            .issue(Uuid::new_v4(), ChallengePurpose::Registration)
            .await
            .unwrap();
        let expired = expired_store.consume(issued.id).await.unwrap_err();
        assert_eq!(expired.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let store = ChallengeStore::in_memory(0);
        store
            .issue(Uuid::new_v4(), ChallengePurpose::Registration)
            .await
            .unwrap();
        store
            .issue(Uuid::new_v4(), ChallengePurpose::Authentication)
            .await
            .unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 2);
        let removed = store.sweep_expired().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }
}
