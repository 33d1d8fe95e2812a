//! Token service
//!
//! Issues, verifies, refreshes, and revokes the service's own access/refresh
//! tokens. Tokens are RS256-signed JWTs with a `kid` header for key
//! rotation, a closed claim struct (no open claim bags), and a `cnf`
//! confirmation claim binding each token to the public key of the device it
//! was issued for.
//!
//! Verification consults the session revocation set and the device registry
//! on every call: an otherwise valid, unexpired token for a revoked session
//! or device verifies as invalid with no caching window.

mod claims;
mod keys;
mod service;
mod sessions;

pub use claims::{Claims, Cnf, TokenUse, CLAIMS_VERSION};
pub use keys::TokenKeys;
pub use service::{TokenPair, TokenService};
pub use sessions::{SessionRecord, SessionStore};

use crate::store::StorageError;

/// Token service errors. Everything except `Storage` maps to a generic
/// "invalid token" at the API boundary; the variants exist for the audit
/// trail and for logging.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid signing key material: {0}")]
    Keys(String),

    #[error("token is malformed")]
    Malformed,

    #[error("token is invalid")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("unknown signing key id: {0}")]
    UnknownKeyId(String),

    #[error("session revoked or unknown")]
    SessionInvalid,

    #[error("device revoked or unknown")]
    DeviceInactive,

    /// A refresh token that was already rotated away was presented again.
    /// Treated as a compromise signal: the named session has been revoked.
    #[error("refresh token superseded for session {0}")]
    RefreshReplay(uuid::Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
