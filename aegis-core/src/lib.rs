//! Aegis Core - WebAuthn ceremony verification primitives
//!
//! This crate implements the cryptographic half of the Aegis authentication
//! service: validating attestations (enrollment) and assertions
//! (authentication) produced by WebAuthn authenticators against a server
//! issued challenge and Relying Party policy.
//!
//! It is deliberately free of I/O: challenge storage, device records, and
//! token issuance live in `aegis-server`. Everything here is a pure function
//! over byte slices, which keeps the verification logic testable with
//! synthetic ceremonies.
//!
//! # Verification pipeline
//!
//! - `client_data`: parse `clientDataJSON`, compare the challenge
//!   byte-for-byte with the stored nonce, and require an exact origin match.
//! - `authenticator_data`: parse the binary authenticator data (RP ID hash,
//!   flags, signature counter, attested credential data).
//! - `cose`: decode the credential public key (ES256 / RS256 only) and
//!   verify ceremony signatures with it.
//! - `attestation` / `assertion`: tie the above together for each ceremony,
//!   including the strict monotonic counter check on assertions.
//!
//! Every failure collapses to a [`VerifierError`] that callers translate to
//! a single generic message at the API boundary; the specific variant is
//! recorded only in the audit trail.

pub mod assertion;
pub mod attestation;
pub mod authenticator_data;
pub mod challenge;
pub mod client_data;
pub mod cose;
pub mod encoding;
pub mod error;
pub mod rp;

pub use assertion::{verify_assertion, AssertionVerification};
pub use attestation::{verify_attestation, AttestationFormat, AttestedCredential};
pub use authenticator_data::{AttestedCredentialData, AuthenticatorData};
pub use challenge::{generate_nonce, NONCE_LEN};
pub use client_data::{CollectedClientData, CEREMONY_CREATE, CEREMONY_GET};
pub use cose::{key_thumbprint, CoseAlgorithm, CredentialPublicKey};
pub use encoding::{b64url_decode, b64url_encode};
pub use error::{Result, VerifierError};
pub use rp::RelyingParty;
