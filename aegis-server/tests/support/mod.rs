//! Shared helpers for API integration tests: an in-memory application state
//! and a virtual authenticator that produces real ES256 ceremonies.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use ciborium::value::Value as CborValue;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use aegis_core::{b64url_decode, b64url_encode};
use aegis_server::{AppState, Config, TokenKeys};

pub const PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/test_rsa_private.pem");
pub const PUBLIC_PEM: &[u8] = include_bytes!("../fixtures/test_rsa_public.pem");

pub const TEST_ORIGIN: &str = "http://localhost:3000";
pub const TEST_RP_ID: &str = "localhost";

/// In-memory application state with the test signing keys.
pub fn test_state() -> AppState {
    let keys = TokenKeys::from_rsa_pems("test-key-1", PRIVATE_PEM, PUBLIC_PEM)
        .expect("test fixtures must parse");
    AppState::in_memory(Config::default(), keys)
}

/// A software authenticator holding one ES256 credential.
pub struct VirtualAuthenticator {
    key: SigningKey,
    cose_key: Vec<u8>,
    pub credential_id: Vec<u8>,
    pub sign_count: u32,
}

impl VirtualAuthenticator {
    pub fn new() -> Self {
        let key = SigningKey::random(&mut OsRng);
        let point = key.verifying_key().to_encoded_point(false);
        let cose_key = encode_ec2_cose_key(point.x().unwrap(), point.y().unwrap());

        let mut credential_id = vec![0u8; 16];
        OsRng.fill_bytes(&mut credential_id);

        Self {
            key,
            cose_key,
            credential_id,
            sign_count: 0,
        }
    }

    /// Produce the JSON credential payload for enroll/finish, signing over
    /// the given base64url challenge.
    pub fn attestation(&self, challenge_b64: &str) -> Value {
        self.attestation_with(challenge_b64, TEST_ORIGIN)
    }

    pub fn attestation_with(&self, challenge_b64: &str, origin: &str) -> Value {
        let client_data = client_data_json("webauthn.create", challenge_b64, origin);
        let auth_data = self.auth_data(0x41, self.sign_count, true);
        let attestation_object = encode_attestation_object(&auth_data);

        json!({
            "id": b64url_encode(&self.credential_id),
            "rawId": b64url_encode(&self.credential_id),
            "response": {
                "attestationObject": b64url_encode(&attestation_object),
                "clientDataJSON": b64url_encode(&client_data),
            },
            "transports": ["internal"],
        })
    }

    /// Produce the JSON assertion payload for authenticate/finish,
    /// incrementing the signature counter first.
    pub fn assertion(&mut self, challenge_b64: &str) -> Value {
        self.sign_count += 1;
        self.assertion_with_count(challenge_b64, self.sign_count)
    }

    /// Produce an assertion with an explicit counter value (for replay
    /// scenarios).
    pub fn assertion_with_count(&self, challenge_b64: &str, sign_count: u32) -> Value {
        let client_data = client_data_json("webauthn.get", challenge_b64, TEST_ORIGIN);
        let auth_data = self.auth_data(0x01, sign_count, false);

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&Sha256::digest(&client_data));
        let signature: p256::ecdsa::Signature = self.key.sign(&signed);

        json!({
            "id": b64url_encode(&self.credential_id),
            "rawId": b64url_encode(&self.credential_id),
            "response": {
                "authenticatorData": b64url_encode(&auth_data),
                "clientDataJSON": b64url_encode(&client_data),
                "signature": b64url_encode(signature.to_der().as_bytes()),
                "userHandle": null,
            },
        })
    }

    fn auth_data(&self, flags: u8, sign_count: u32, attested: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&Sha256::digest(TEST_RP_ID.as_bytes()));
        out.push(flags);
        out.extend_from_slice(&sign_count.to_be_bytes());
        if attested {
            out.extend_from_slice(&[0u8; 16]); // AAGUID
            out.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
            out.extend_from_slice(&self.credential_id);
            out.extend_from_slice(&self.cose_key);
        }
        out
    }
}

fn client_data_json(ceremony: &str, challenge_b64: &str, origin: &str) -> Vec<u8> {
    json!({
        "type": ceremony,
        "challenge": challenge_b64,
        "origin": origin,
    })
    .to_string()
    .into_bytes()
}

fn encode_ec2_cose_key(x: &[u8], y: &[u8]) -> Vec<u8> {
    let value = CborValue::Map(vec![
        (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
        (
            CborValue::Integer(3.into()),
            CborValue::Integer((-7i64).into()),
        ),
        (
            CborValue::Integer((-1i64).into()),
            CborValue::Integer(1.into()),
        ),
        (
            CborValue::Integer((-2i64).into()),
            CborValue::Bytes(x.to_vec()),
        ),
        (
            CborValue::Integer((-3i64).into()),
            CborValue::Bytes(y.to_vec()),
        ),
    ]);
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&value, &mut buf).unwrap();
    buf
}

fn encode_attestation_object(auth_data: &[u8]) -> Vec<u8> {
    let value = CborValue::Map(vec![
        (CborValue::Text("fmt".into()), CborValue::Text("none".into())),
        (CborValue::Text("attStmt".into()), CborValue::Map(vec![])),
        (
            CborValue::Text("authData".into()),
            CborValue::Bytes(auth_data.to_vec()),
        ),
    ]);
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&value, &mut buf).unwrap();
    buf
}

/// Tamper with a credential payload's clientDataJSON challenge by flipping
/// one byte of the decoded nonce.
pub fn tamper_client_data_challenge(mut credential: Value) -> Value {
    let cdj_b64 = credential["response"]["clientDataJSON"]
        .as_str()
        .unwrap()
        .to_string();
    let cdj = b64url_decode(&cdj_b64).unwrap();
    let mut client_data: Value = serde_json::from_slice(&cdj).unwrap();

    let mut nonce = b64url_decode(client_data["challenge"].as_str().unwrap()).unwrap();
    nonce[0] ^= 0x01;
    client_data["challenge"] = Value::String(b64url_encode(&nonce));

    credential["response"]["clientDataJSON"] =
        Value::String(b64url_encode(client_data.to_string().as_bytes()));
    credential
}

/// POST a JSON body, returning status and parsed response body.
pub async fn post_json(
    app: &Router,
    uri: &str,
    body: Value,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// GET a JSON resource, returning status and parsed response body.
pub async fn get_json(app: &Router, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Run the full enrollment flow for an email, returning the credential's
/// authenticator and the finish response body.
pub async fn enroll(app: &Router, email: &str) -> (VirtualAuthenticator, Value) {
    let (status, start) = post_json(
        app,
        "/auth/enroll/start",
        json!({ "email": email }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "enroll/start failed: {start}");

    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap().to_string();
    let authenticator = VirtualAuthenticator::new();
    let credential = authenticator.attestation(&challenge_b64);

    let (status, finish) = post_json(
        app,
        "/auth/enroll/finish",
        json!({
            "challenge_id": start["challenge_id"],
            "credential": credential,
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "enroll/finish failed: {finish}");

    (authenticator, finish)
}
