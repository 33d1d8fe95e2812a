//! Token claim structures.
//!
//! The claim set is closed and versioned: introspection output is exactly
//! these fields, and unknown claims cannot leak through.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claim layout version.
pub const CLAIMS_VERSION: u8 = 1;

/// Whether a token is an access or a refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// Proof-of-possession confirmation claim (RFC 7800 shape).
///
/// `jkt` is the base64url SHA-256 thumbprint of the device's COSE public
/// key; possession of the token alone is insufficient for key-bound
/// operations without control of that key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cnf {
    pub jkt: String,
}

/// The closed claim set carried by both access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Claim layout version
    pub ver: u8,
    /// Subject: the account id
    pub sub: Uuid,
    /// The device this token is bound to
    pub device_id: Uuid,
    /// The session this token belongs to
    pub session_id: Uuid,
    pub iss: String,
    pub aud: String,
    pub scope: String,
    /// Issued-at, Unix seconds UTC
    pub iat: i64,
    /// Not-before, Unix seconds UTC
    pub nbf: i64,
    /// Expiry, Unix seconds UTC
    pub exp: i64,
    pub cnf: Cnf,
    pub token_use: TokenUse,
    /// Rotation id, present on refresh tokens only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
}
