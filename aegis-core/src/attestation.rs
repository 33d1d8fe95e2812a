//! Attestation (enrollment ceremony) verification.

use std::io::Cursor;

use ciborium::value::Value as CborValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::authenticator_data::AuthenticatorData;
use crate::client_data::{verify_client_data, CEREMONY_CREATE};
use crate::cose::{CoseAlgorithm, CredentialPublicKey};
use crate::error::VerifierError;
use crate::rp::RelyingParty;

/// Attestation statement formats this service accepts.
///
/// Enrollment requests `attestation: "none"`, so authenticators normally
/// reply with the `none` format; `packed` self-attestation is verified when
/// present. Certificate-chain (`x5c`) attestation and every other format are
/// rejected rather than partially trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationFormat {
    /// Self-attestation with the credential key itself.
    Packed,
    /// No attestation statement.
    #[default]
    None,
}

impl AttestationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::None => "none",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "packed" => Some(Self::Packed),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// The credential extracted from a successfully verified attestation.
#[derive(Debug, Clone)]
pub struct AttestedCredential {
    pub credential_id: Vec<u8>,
    pub public_key_cose: Vec<u8>,
    pub algorithm: CoseAlgorithm,
    pub aaguid: Uuid,
    pub sign_count: u32,
    pub format: AttestationFormat,
}

/// Verify a registration attestation against the stored challenge nonce and
/// Relying Party policy, extracting the new credential.
pub fn verify_attestation(
    rp: &RelyingParty,
    attestation_object: &[u8],
    client_data_json: &[u8],
    expected_nonce: &[u8],
) -> Result<AttestedCredential, VerifierError> {
    verify_client_data(client_data_json, CEREMONY_CREATE, expected_nonce, &rp.origin)?;

    let value: CborValue = ciborium::de::from_reader(Cursor::new(attestation_object))
        .map_err(|_| VerifierError::MalformedAttestation("not valid CBOR".into()))?;
    let map = value
        .as_map()
        .ok_or_else(|| VerifierError::MalformedAttestation("not a CBOR map".into()))?;

    let fmt = map_get(map, "fmt")
        .and_then(|v| v.as_text())
        .ok_or_else(|| VerifierError::MalformedAttestation("missing fmt".into()))?;
    let att_stmt = map_get(map, "attStmt")
        .and_then(|v| v.as_map())
        .ok_or_else(|| VerifierError::MalformedAttestation("missing attStmt".into()))?;
    let auth_data_bytes = map_get(map, "authData")
        .and_then(|v| v.as_bytes())
        .ok_or_else(|| VerifierError::MalformedAttestation("missing authData".into()))?;

    let auth_data = AuthenticatorData::parse(auth_data_bytes, true)?;
    if auth_data.rp_id_hash != rp.id_hash() {
        return Err(VerifierError::RpIdHashMismatch);
    }
    if !auth_data.user_present() {
        return Err(VerifierError::UserNotPresent);
    }

    let attested = auth_data
        .attested_credential
        .as_ref()
        .expect("parse with require_attested_credential guarantees presence");
    let public_key = CredentialPublicKey::parse(&attested.public_key_cose)?;

    let format = match fmt {
        "none" => AttestationFormat::None,
        "packed" => {
            verify_packed_self_attestation(
                att_stmt,
                &public_key,
                auth_data_bytes,
                client_data_json,
            )?;
            AttestationFormat::Packed
        }
        other => return Err(VerifierError::UnsupportedAttestationFormat(other.into())),
    };

    tracing::debug!(
        algorithm = public_key.algorithm().as_str(),
        format = format.as_str(),
        sign_count = auth_data.sign_count,
        "Attestation verified"
    );

    Ok(AttestedCredential {
        credential_id: attested.credential_id.clone(),
        public_key_cose: attested.public_key_cose.clone(),
        algorithm: public_key.algorithm(),
        aaguid: attested.aaguid,
        sign_count: auth_data.sign_count,
        format,
    })
}

/// Verify a `packed` self-attestation statement.
///
/// Self-attestation signs `authData || SHA-256(clientDataJSON)` with the
/// credential private key, so the declared algorithm must match the
/// credential key and the signature must verify against it. Statements
/// carrying an `x5c` certificate chain are rejected as unsupported.
fn verify_packed_self_attestation(
    att_stmt: &[(CborValue, CborValue)],
    public_key: &CredentialPublicKey,
    auth_data_bytes: &[u8],
    client_data_json: &[u8],
) -> Result<(), VerifierError> {
    if map_get(att_stmt, "x5c").is_some() {
        return Err(VerifierError::UnsupportedAttestationFormat(
            "packed with certificate chain".into(),
        ));
    }

    let alg = map_get(att_stmt, "alg")
        .and_then(|v| match v {
            CborValue::Integer(i) => Some(i128::from(*i) as i64),
            _ => None,
        })
        .ok_or_else(|| VerifierError::MalformedAttestation("missing attStmt alg".into()))?;
    if alg != public_key.algorithm().cose_id() {
        return Err(VerifierError::MalformedAttestation(format!(
            "attStmt alg {alg} does not match credential key"
        )));
    }

    let sig = map_get(att_stmt, "sig")
        .and_then(|v| v.as_bytes())
        .ok_or_else(|| VerifierError::MalformedAttestation("missing attStmt sig".into()))?;

    let mut signed = Vec::with_capacity(auth_data_bytes.len() + 32);
    signed.extend_from_slice(auth_data_bytes);
    signed.extend_from_slice(&Sha256::digest(client_data_json));
    public_key.verify(&signed, sig)
}

fn map_get<'a>(map: &'a [(CborValue, CborValue)], key: &str) -> Option<&'a CborValue> {
    map.iter().find_map(|(k, v)| match k {
        CborValue::Text(t) if t == key => Some(v),
        _ => None,
    })
}
