//! Relying Party policy.

use sha2::{Digest, Sha256};

/// The Relying Party identity a ceremony is verified against.
///
/// `origin` comparison is exact string equality; no subdomain or scheme
/// normalization is applied.
#[derive(Debug, Clone)]
pub struct RelyingParty {
    /// RP ID, typically the effective domain (e.g. "shop.example.com").
    pub id: String,
    /// Expected web origin (e.g. "https://shop.example.com").
    pub origin: String,
    /// Human-readable service name shown by authenticators.
    pub name: String,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>, origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
            name: name.into(),
        }
    }

    /// SHA-256 hash of the RP ID, as embedded in authenticator data.
    pub fn id_hash(&self) -> [u8; 32] {
        Sha256::digest(self.id.as_bytes()).into()
    }
}
