use thiserror::Error;

/// Errors produced while verifying a WebAuthn ceremony.
///
/// These variants are internal detail: callers translate any of them into a
/// single generic failure before it leaves the service boundary, and only the
/// audit trail records which one actually occurred.
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("malformed client data: {0}")]
    MalformedClientData(String),

    #[error("ceremony type mismatch: expected {expected}, got {got}")]
    CeremonyTypeMismatch { expected: &'static str, got: String },

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error("origin mismatch: expected {expected}, got {got}")]
    OriginMismatch { expected: String, got: String },

    #[error("malformed attestation object: {0}")]
    MalformedAttestation(String),

    #[error("malformed authenticator data: {0}")]
    MalformedAuthenticatorData(String),

    #[error("relying party id hash mismatch")]
    RpIdHashMismatch,

    #[error("user presence flag not set")]
    UserNotPresent,

    #[error("unsupported attestation format: {0}")]
    UnsupportedAttestationFormat(String),

    #[error("unsupported credential key: kty={kty}, alg={alg}")]
    UnsupportedKey { kty: i64, alg: i64 },

    #[error("malformed credential public key: {0}")]
    MalformedKey(String),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("signature counter did not increase: stored {stored}, presented {presented}")]
    CounterRegression { stored: u32, presented: u32 },
}

pub type Result<T> = std::result::Result<T, VerifierError>;
