//! Authenticator data parsing.
//!
//! Binary layout (WebAuthn Level 2 §6.1):
//! - 32 bytes: RP ID hash
//! - 1 byte: flags
//! - 4 bytes: signature counter (big-endian)
//! - variable: attested credential data, when the AT flag is set:
//!   - 16 bytes: AAGUID
//!   - 2 bytes: credential id length (big-endian)
//!   - L bytes: credential id
//!   - variable: COSE credential public key (CBOR)

use std::io::Cursor;

use ciborium::value::Value as CborValue;
use uuid::Uuid;

use crate::error::VerifierError;

const FLAG_USER_PRESENT: u8 = 0x01;
const FLAG_USER_VERIFIED: u8 = 0x04;
const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

/// Attested credential data present at registration time.
#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    pub aaguid: Uuid,
    pub credential_id: Vec<u8>,
    pub public_key_cose: Vec<u8>,
}

/// Parsed authenticator data.
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    /// Parse raw authenticator data bytes.
    ///
    /// When `require_attested_credential` is set (registration), the AT flag
    /// and the attested credential data block are mandatory.
    pub fn parse(data: &[u8], require_attested_credential: bool) -> Result<Self, VerifierError> {
        if data.len() < 37 {
            return Err(VerifierError::MalformedAuthenticatorData(format!(
                "too short: {} bytes",
                data.len()
            )));
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);
        let flags = data[32];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let mut attested_credential = None;
        if require_attested_credential || (flags & FLAG_ATTESTED_CREDENTIAL_DATA) != 0 {
            if (flags & FLAG_ATTESTED_CREDENTIAL_DATA) == 0 {
                return Err(VerifierError::MalformedAuthenticatorData(
                    "attested credential data flag not set".into(),
                ));
            }

            let mut offset = 37usize;
            if data.len() < offset + 18 {
                return Err(VerifierError::MalformedAuthenticatorData(
                    "attested credential data truncated".into(),
                ));
            }

            let aaguid_bytes: [u8; 16] = data[offset..offset + 16]
                .try_into()
                .expect("slice length checked above");
            let aaguid = Uuid::from_bytes(aaguid_bytes);
            offset += 16;

            let id_len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
            offset += 2;

            if data.len() < offset + id_len {
                return Err(VerifierError::MalformedAuthenticatorData(
                    "credential id truncated".into(),
                ));
            }
            let credential_id = data[offset..offset + id_len].to_vec();
            offset += id_len;

            // The COSE key is a CBOR item of unknown length; decode it to
            // find where it ends and keep the raw bytes.
            let mut cursor = Cursor::new(&data[offset..]);
            let _key: CborValue = ciborium::de::from_reader(&mut cursor).map_err(|_| {
                VerifierError::MalformedAuthenticatorData("credential public key not CBOR".into())
            })?;
            let used = cursor.position() as usize;
            if used == 0 || offset + used > data.len() {
                return Err(VerifierError::MalformedAuthenticatorData(
                    "credential public key truncated".into(),
                ));
            }
            let public_key_cose = data[offset..offset + used].to_vec();

            attested_credential = Some(AttestedCredentialData {
                aaguid,
                credential_id,
                public_key_cose,
            });
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders for synthetic authenticator data used across verifier tests.

    use super::*;

    pub fn build_auth_data(
        rp_id_hash: [u8; 32],
        flags: u8,
        sign_count: u32,
        attested: Option<(Uuid, &[u8], &[u8])>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&rp_id_hash);
        out.push(flags);
        out.extend_from_slice(&sign_count.to_be_bytes());
        if let Some((aaguid, credential_id, cose_key)) = attested {
            out.extend_from_slice(aaguid.as_bytes());
            out.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
            out.extend_from_slice(credential_id);
            out.extend_from_slice(cose_key);
        }
        out
    }
}
