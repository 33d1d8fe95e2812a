//! Collected client data validation.
//!
//! The `clientDataJSON` blob is produced by the browser and binds the
//! ceremony to a specific challenge and origin. The challenge comparison is
//! byte-for-byte against the server-issued nonce; the origin comparison is
//! exact string equality against the configured Relying Party origin.

use serde::Deserialize;

use crate::encoding::b64url_decode;
use crate::error::VerifierError;

/// Ceremony type for credential creation (enrollment).
pub const CEREMONY_CREATE: &str = "webauthn.create";
/// Ceremony type for credential assertion (authentication).
pub const CEREMONY_GET: &str = "webauthn.get";

/// The subset of collected client data the server validates.
#[derive(Debug, Deserialize)]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub ceremony_type: String,
    pub challenge: String,
    pub origin: String,
}

/// Parse and validate `clientDataJSON` against the expected ceremony type,
/// challenge nonce, and origin.
pub fn verify_client_data(
    client_data_json: &[u8],
    expected_type: &'static str,
    expected_nonce: &[u8],
    expected_origin: &str,
) -> Result<CollectedClientData, VerifierError> {
    let client_data: CollectedClientData = serde_json::from_slice(client_data_json)
        .map_err(|e| VerifierError::MalformedClientData(e.to_string()))?;

    if client_data.ceremony_type != expected_type {
        return Err(VerifierError::CeremonyTypeMismatch {
            expected: expected_type,
            got: client_data.ceremony_type,
        });
    }

    let presented_nonce = b64url_decode(&client_data.challenge)
        .ok_or_else(|| VerifierError::MalformedClientData("challenge is not base64url".into()))?;
    if presented_nonce != expected_nonce {
        return Err(VerifierError::ChallengeMismatch);
    }

    if client_data.origin != expected_origin {
        return Err(VerifierError::OriginMismatch {
            expected: expected_origin.to_string(),
            got: client_data.origin,
        });
    }

    Ok(client_data)
}
