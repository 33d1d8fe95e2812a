//! Assertion (authentication ceremony) verification.

use sha2::{Digest, Sha256};

use crate::authenticator_data::AuthenticatorData;
use crate::client_data::{verify_client_data, CEREMONY_GET};
use crate::cose::CredentialPublicKey;
use crate::error::VerifierError;
use crate::rp::RelyingParty;

/// Outcome of a successfully verified assertion.
#[derive(Debug, Clone, Copy)]
pub struct AssertionVerification {
    /// The authenticator's signature counter, to be persisted as the new
    /// high-water mark for the device.
    pub sign_count: u32,
    pub user_verified: bool,
}

/// Verify an authentication assertion against the stored challenge nonce,
/// Relying Party policy, and the device's previously registered public key.
///
/// The signature covers `authenticatorData || SHA-256(clientDataJSON)`. The
/// signature counter must be strictly greater than `last_sign_count`; a
/// non-increasing counter indicates a cloned authenticator and is a hard
/// failure even when the signature itself is valid.
pub fn verify_assertion(
    rp: &RelyingParty,
    authenticator_data: &[u8],
    client_data_json: &[u8],
    signature: &[u8],
    expected_nonce: &[u8],
    public_key_cose: &[u8],
    last_sign_count: u32,
) -> Result<AssertionVerification, VerifierError> {
    verify_client_data(client_data_json, CEREMONY_GET, expected_nonce, &rp.origin)?;

    let auth_data = AuthenticatorData::parse(authenticator_data, false)?;
    if auth_data.rp_id_hash != rp.id_hash() {
        return Err(VerifierError::RpIdHashMismatch);
    }
    if !auth_data.user_present() {
        return Err(VerifierError::UserNotPresent);
    }

    let public_key = CredentialPublicKey::parse(public_key_cose)?;

    let mut signed = Vec::with_capacity(authenticator_data.len() + 32);
    signed.extend_from_slice(authenticator_data);
    signed.extend_from_slice(&Sha256::digest(client_data_json));
    public_key.verify(&signed, signature)?;

    if auth_data.sign_count <= last_sign_count {
        return Err(VerifierError::CounterRegression {
            stored: last_sign_count,
            presented: auth_data.sign_count,
        });
    }

    tracing::debug!(
        sign_count = auth_data.sign_count,
        user_verified = auth_data.user_verified(),
        "Assertion verified"
    );

    Ok(AssertionVerification {
        sign_count: auth_data.sign_count,
        user_verified: auth_data.user_verified(),
    })
}
