//! Typed credential option payloads.
//!
//! The option shapes handed to `navigator.credentials.create()` /
//! `.get()` are closed structs rather than open JSON maps, so the wire
//! surface is exhaustively specified.

use serde::Serialize;
use utoipa::ToSchema;

use aegis_core::{b64url_encode, CoseAlgorithm, RelyingParty};

use crate::account::Account;
use crate::device::Device;

/// Relying Party entity.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RpEntity {
    pub id: String,
    pub name: String,
}

/// User entity shown by the authenticator during registration.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// Account id bytes, base64url
    pub id: String,
    pub name: String,
    pub display_name: String,
}

/// Acceptable credential algorithm.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub credential_type: String,
    /// COSE algorithm identifier
    #[schema(example = -7)]
    pub alg: i64,
}

/// Reference to an already-enrolled credential.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub credential_type: String,
    /// Credential id, base64url
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

impl CredentialDescriptor {
    pub fn from_device(device: &Device) -> Self {
        Self {
            credential_type: "public-key".to_string(),
            id: b64url_encode(&device.credential_id),
            transports: device.transports.clone(),
        }
    }
}

/// Options for `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCreationOptions {
    pub rp: RpEntity,
    pub user: UserEntity,
    /// Challenge nonce, base64url
    pub challenge: String,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    /// Ceremony timeout in milliseconds, aligned with the challenge TTL
    pub timeout: u64,
    #[schema(example = "none")]
    pub attestation: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_credentials: Vec<CredentialDescriptor>,
}

impl CredentialCreationOptions {
    pub fn new(
        rp: &RelyingParty,
        account: &Account,
        nonce: &[u8],
        ttl_secs: u64,
        existing_devices: &[Device],
    ) -> Self {
        Self {
            rp: RpEntity {
                id: rp.id.clone(),
                name: rp.name.clone(),
            },
            user: UserEntity {
                id: b64url_encode(account.id.as_bytes()),
                name: account.email.clone(),
                display_name: account
                    .display_name
                    .clone()
                    .unwrap_or_else(|| account.email.clone()),
            },
            challenge: b64url_encode(nonce),
            pub_key_cred_params: vec![
                PubKeyCredParam {
                    credential_type: "public-key".to_string(),
                    alg: CoseAlgorithm::Es256.cose_id(),
                },
                PubKeyCredParam {
                    credential_type: "public-key".to_string(),
                    alg: CoseAlgorithm::Rs256.cose_id(),
                },
            ],
            timeout: ttl_secs * 1000,
            attestation: "none".to_string(),
            exclude_credentials: existing_devices
                .iter()
                .map(CredentialDescriptor::from_device)
                .collect(),
        }
    }
}

/// Options for `navigator.credentials.get()`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestOptions {
    /// Challenge nonce, base64url
    pub challenge: String,
    /// Ceremony timeout in milliseconds
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    #[schema(example = "preferred")]
    pub user_verification: String,
}

impl CredentialRequestOptions {
    pub fn new(
        rp: &RelyingParty,
        nonce: &[u8],
        ttl_secs: u64,
        allow_credentials: Vec<CredentialDescriptor>,
    ) -> Self {
        Self {
            challenge: b64url_encode(nonce),
            timeout: ttl_secs * 1000,
            rp_id: rp.id.clone(),
            allow_credentials,
            user_verification: "preferred".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Role;
    use chrono::Utc;
    use uuid::Uuid;

    fn account() -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            display_name: None,
            role: Role::Customer,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_creation_options_shape() {
        let rp = RelyingParty::new("localhost", "http://localhost:3000", "Aegis");
        let nonce = [5u8; 32];
        let options = CredentialCreationOptions::new(&rp, &account(), &nonce, 60, &[]);

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["rp"]["id"], "localhost");
        assert_eq!(json["attestation"], "none");
        assert_eq!(json["timeout"], 60_000);
        assert_eq!(json["pubKeyCredParams"][0]["alg"], -7);
        assert_eq!(json["pubKeyCredParams"][1]["alg"], -257);
        // Display name falls back to the email.
        assert_eq!(json["user"]["displayName"], "alice@example.com");
        // Empty exclude list is omitted entirely.
        assert!(json.get("excludeCredentials").is_none());

        let decoded = aegis_core::b64url_decode(json["challenge"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, nonce);
    }

    #[test]
    fn test_request_options_shape() {
        let rp = RelyingParty::new("localhost", "http://localhost:3000", "Aegis");
        let nonce = [9u8; 32];
        let options = CredentialRequestOptions::new(&rp, &nonce, 60, vec![]);

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["rpId"], "localhost");
        assert_eq!(json["userVerification"], "preferred");
        assert_eq!(json["allowCredentials"], serde_json::json!([]));
    }
}
