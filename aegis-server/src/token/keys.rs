//! Signing key material.
//!
//! Asymmetric signing (RS256) with a key id in the token header. Rotation is
//! supported by keeping multiple verification keys keyed by `kid` while
//! signing with the active one; superseded public keys stay registered until
//! the last token signed with them has expired.

use std::collections::HashMap;

use jsonwebtoken::{DecodingKey, EncodingKey};

use super::TokenError;

/// The service's signing key plus the set of acceptable verification keys.
pub struct TokenKeys {
    kid: String,
    encoding: EncodingKey,
    decoding: HashMap<String, DecodingKey>,
}

impl TokenKeys {
    /// Build from an RSA private/public PEM pair.
    pub fn from_rsa_pems(
        kid: impl Into<String>,
        private_pem: &[u8],
        public_pem: &[u8],
    ) -> Result<Self, TokenError> {
        let kid = kid.into();
        let encoding = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| TokenError::Keys(format!("private key: {e}")))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| TokenError::Keys(format!("public key: {e}")))?;

        let mut keys = HashMap::new();
        keys.insert(kid.clone(), decoding);
        Ok(Self {
            kid,
            encoding,
            decoding: keys,
        })
    }

    /// Register an additional verification key for a rotated-out `kid`.
    pub fn add_verification_key(
        &mut self,
        kid: impl Into<String>,
        public_pem: &[u8],
    ) -> Result<(), TokenError> {
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| TokenError::Keys(format!("public key: {e}")))?;
        self.decoding.insert(kid.into(), decoding);
        Ok(())
    }

    /// The `kid` written into newly signed token headers.
    pub fn signing_kid(&self) -> &str {
        &self.kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key_for(&self, kid: &str) -> Option<&DecodingKey> {
        self.decoding.get(kid)
    }
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("kid", &self.kid)
            .field("verification_kids", &self.decoding.keys().collect::<Vec<_>>())
            .finish()
    }
}
