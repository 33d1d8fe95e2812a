//! COSE credential public key handling.
//!
//! Only the two algorithms offered at enrollment are accepted:
//! ES256 (ECDSA P-256 with SHA-256, COSE alg -7) and RS256
//! (RSASSA-PKCS1-v1_5 with SHA-256, COSE alg -257). Anything else is a hard
//! failure, not a downgrade.

use std::io::Cursor;

use ciborium::value::Value as CborValue;
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::signature::Verifier as _;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding::b64url_encode;
use crate::error::VerifierError;

const COSE_KTY: i128 = 1;
const COSE_ALG: i128 = 3;
const COSE_EC2_CRV: i128 = -1;
const COSE_EC2_X: i128 = -2;
const COSE_EC2_Y: i128 = -3;
const COSE_RSA_N: i128 = -1;
const COSE_RSA_E: i128 = -2;

const KTY_EC2: i128 = 2;
const KTY_RSA: i128 = 3;
const CRV_P256: i128 = 1;

/// Supported COSE signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoseAlgorithm {
    #[serde(rename = "ES256")]
    Es256,
    #[serde(rename = "RS256")]
    Rs256,
}

impl CoseAlgorithm {
    /// COSE algorithm identifier (RFC 9053).
    pub fn cose_id(&self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Rs256 => -257,
        }
    }

    pub fn from_cose_id(id: i64) -> Option<Self> {
        match id {
            -7 => Some(Self::Es256),
            -257 => Some(Self::Rs256),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Rs256 => "RS256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ES256" => Some(Self::Es256),
            "RS256" => Some(Self::Rs256),
            _ => None,
        }
    }
}

/// A credential public key parsed out of its COSE encoding.
#[derive(Debug, Clone)]
pub enum CredentialPublicKey {
    Es256(P256VerifyingKey),
    Rs256(RsaPublicKey),
}

impl CredentialPublicKey {
    /// Parse a COSE-encoded credential public key.
    pub fn parse(cose_bytes: &[u8]) -> Result<Self, VerifierError> {
        let value: CborValue = ciborium::de::from_reader(Cursor::new(cose_bytes))
            .map_err(|_| VerifierError::MalformedKey("not valid CBOR".into()))?;
        let map = value
            .as_map()
            .ok_or_else(|| VerifierError::MalformedKey("not a CBOR map".into()))?;

        let kty = map_get_int(map, COSE_KTY)
            .ok_or_else(|| VerifierError::MalformedKey("missing kty".into()))?;
        let alg = map_get_int(map, COSE_ALG)
            .ok_or_else(|| VerifierError::MalformedKey("missing alg".into()))?;

        match (kty, alg) {
            (KTY_EC2, -7) => {
                let crv = map_get_int(map, COSE_EC2_CRV)
                    .ok_or_else(|| VerifierError::MalformedKey("missing crv".into()))?;
                if crv != CRV_P256 {
                    return Err(VerifierError::MalformedKey(format!(
                        "unsupported curve {crv}"
                    )));
                }
                let x = map_get_bytes(map, COSE_EC2_X)
                    .ok_or_else(|| VerifierError::MalformedKey("missing x coordinate".into()))?;
                let y = map_get_bytes(map, COSE_EC2_Y)
                    .ok_or_else(|| VerifierError::MalformedKey("missing y coordinate".into()))?;
                if x.len() != 32 || y.len() != 32 {
                    return Err(VerifierError::MalformedKey(
                        "coordinate length is not 32 bytes".into(),
                    ));
                }

                let mut sec1 = Vec::with_capacity(65);
                sec1.push(0x04);
                sec1.extend_from_slice(x);
                sec1.extend_from_slice(y);
                let key = P256VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|_| VerifierError::MalformedKey("point not on curve".into()))?;
                Ok(Self::Es256(key))
            }
            (KTY_RSA, -257) => {
                let n = map_get_bytes(map, COSE_RSA_N)
                    .ok_or_else(|| VerifierError::MalformedKey("missing modulus".into()))?;
                let e = map_get_bytes(map, COSE_RSA_E)
                    .ok_or_else(|| VerifierError::MalformedKey("missing exponent".into()))?;
                let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                    .map_err(|e| VerifierError::MalformedKey(e.to_string()))?;
                Ok(Self::Rs256(key))
            }
            (kty, alg) => Err(VerifierError::UnsupportedKey {
                kty: kty as i64,
                alg: alg as i64,
            }),
        }
    }

    pub fn algorithm(&self) -> CoseAlgorithm {
        match self {
            Self::Es256(_) => CoseAlgorithm::Es256,
            Self::Rs256(_) => CoseAlgorithm::Rs256,
        }
    }

    /// Verify a ceremony signature over `message`.
    ///
    /// ES256 signatures arrive DER-encoded from authenticators; RS256 uses
    /// PKCS#1 v1.5 padding.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), VerifierError> {
        match self {
            Self::Es256(key) => {
                let sig = P256Signature::from_der(signature)
                    .map_err(|_| VerifierError::SignatureInvalid)?;
                key.verify(message, &sig)
                    .map_err(|_| VerifierError::SignatureInvalid)
            }
            Self::Rs256(key) => {
                let verifying_key = RsaVerifyingKey::<Sha256>::new(key.clone());
                let sig = RsaSignature::try_from(signature)
                    .map_err(|_| VerifierError::SignatureInvalid)?;
                verifying_key
                    .verify(message, &sig)
                    .map_err(|_| VerifierError::SignatureInvalid)
            }
        }
    }
}

/// Base64url SHA-256 thumbprint of a COSE key, used as the token
/// proof-of-possession (`cnf.jkt`) reference.
pub fn key_thumbprint(cose_bytes: &[u8]) -> String {
    b64url_encode(&Sha256::digest(cose_bytes))
}

fn map_get_int(map: &[(CborValue, CborValue)], key: i128) -> Option<i128> {
    map.iter().find_map(|(k, v)| match (k, v) {
        (CborValue::Integer(ki), CborValue::Integer(vi)) if i128::from(*ki) == key => {
            Some(i128::from(*vi))
        }
        _ => None,
    })
}

fn map_get_bytes(map: &[(CborValue, CborValue)], key: i128) -> Option<&[u8]> {
    map.iter().find_map(|(k, v)| match (k, v) {
        (CborValue::Integer(ki), CborValue::Bytes(bytes)) if i128::from(*ki) == key => {
            Some(bytes.as_slice())
        }
        _ => None,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use p256::ecdsa::signature::Signer;

    #[test]
    fn test_parse_and_verify_es256() {
        let (signing_key, cose) = generate_es256_credential();
        let key = CredentialPublicKey::parse(&cose).unwrap();
        assert_eq!(key.algorithm(), CoseAlgorithm::Es256);

        let message = b"signed ceremony data";
        let sig: p256::ecdsa::Signature = signing_key.sign(message);
        key.verify(message, sig.to_der().as_bytes()).unwrap();
    }

    #[test]
    fn test_es256_rejects_wrong_message() {
        let (signing_key, cose) = generate_es256_credential();
        let key = CredentialPublicKey::parse(&cose).unwrap();

        let sig: p256::ecdsa::Signature = signing_key.sign(b"original");
        let err = key.verify(b"tampered", sig.to_der().as_bytes()).unwrap_err();
        assert!(matches!(err, VerifierError::SignatureInvalid));
    }

    #[test]
    fn test_unsupported_algorithm_rejected() {
        // EdDSA (alg -8) is not offered at enrollment.
        let cose = encode_cose_key_with(1, -8);
        let err = CredentialPublicKey::parse(&cose).unwrap_err();
        assert!(matches!(err, VerifierError::UnsupportedKey { .. }));
    }

    #[test]
    fn test_garbage_key_rejected() {
        let err = CredentialPublicKey::parse(&[0xff, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, VerifierError::MalformedKey(_)));
    }

    #[test]
    fn test_algorithm_names_round_trip() {
        assert_eq!(CoseAlgorithm::from_name("ES256"), Some(CoseAlgorithm::Es256));
        assert_eq!(CoseAlgorithm::from_name("RS256"), Some(CoseAlgorithm::Rs256));
        assert_eq!(CoseAlgorithm::from_name("HS256"), None);
        assert_eq!(CoseAlgorithm::from_cose_id(-7), Some(CoseAlgorithm::Es256));
        assert_eq!(CoseAlgorithm::Es256.as_str(), "ES256");
    }

    #[test]
    fn test_thumbprint_is_stable() {
        let (_, cose) = generate_es256_credential();
        assert_eq!(key_thumbprint(&cose), key_thumbprint(&cose));
        assert_eq!(key_thumbprint(&cose).len(), 43); // 32 bytes, base64url no-pad
    }
}
