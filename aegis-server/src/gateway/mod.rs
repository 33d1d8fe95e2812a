//! Protocol gateway
//!
//! The HTTP-facing layer that sequences challenge issuance, ceremony
//! verification, device registration, and token issuance for each protocol
//! operation, and writes one audit event per attempt at every terminal.
//!
//! ## Architecture
//!
//! - `enroll`: enrollment start/finish
//! - `authenticate`: authentication start/finish
//! - `introspect`: RFC 7662-shaped token introspection
//! - `session`: refresh rotation, logout, device listing and revocation
//! - `options`: typed credential creation/request option payloads
//! - `health`: liveness and readiness probes
//!
//! External failure messages are deliberately coarse: challenge problems,
//! signature problems, and unknown accounts all collapse into a handful of
//! generic strings so responses cannot be used for account enumeration. The
//! specific internal reason goes to the audit log only.

pub mod authenticate;
pub mod enroll;
pub mod health;
pub mod introspect;
pub mod options;
pub mod session;

pub use authenticate::{
    authenticate_finish, authenticate_start, AuthenticateFinishRequest,
    AuthenticateFinishResponse, AuthenticateStartRequest, AuthenticateStartResponse,
};
pub use enroll::{
    enroll_finish, enroll_start, EnrollFinishRequest, EnrollFinishResponse, EnrollStartRequest,
    EnrollStartResponse,
};
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use introspect::{introspect, IntrospectRequest, IntrospectionResponse};
pub use options::{
    CredentialCreationOptions, CredentialDescriptor, CredentialRequestOptions, PubKeyCredParam,
    RpEntity, UserEntity,
};
pub use session::{
    list_devices, logout, refresh_token, revoke_device, DeviceListResponse, LogoutResponse,
    RefreshRequest, RefreshResponse, RevokeDeviceRequest,
};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use aegis_core::b64url_encode;

use crate::account::Role;
use crate::device::Device;
use crate::error::ApiError;

/// Generic message for challenge consumption failures. Unknown, expired, and
/// replayed challenge ids are indistinguishable to the caller.
pub const MSG_INVALID_CHALLENGE: &str = "invalid or expired challenge";
/// Generic message for every ceremony verification failure.
pub const MSG_VERIFICATION_FAILED: &str = "authentication failed";
/// Message for authenticate-start against an account with no usable devices.
pub const MSG_NO_DEVICES: &str = "no registered devices";

/// Token scope granted per role.
pub fn scope_for(role: Role) -> &'static str {
    match role {
        Role::Customer => "storefront",
        Role::Admin => "storefront admin",
    }
}

/// Client metadata recorded with every audit event.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let user_agent = parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        Ok(ClientMeta { ip, user_agent })
    }
}

/// Device DTO returned by the API (raw key material stays internal).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceResponse {
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    /// Authenticator credential id, base64url
    pub credential_id: String,
    /// Credential signature algorithm
    #[schema(example = "ES256")]
    pub algorithm: String,
    #[schema(value_type = String, example = "00000000-0000-0000-0000-000000000000")]
    pub aaguid: Uuid,
    #[schema(example = "none")]
    pub attestation_format: String,
    pub transports: Vec<String>,
    #[schema(example = "active")]
    pub status: String,
    #[schema(value_type = String, example = "2026-08-01T10:00:00Z")]
    pub created_at: DateTime<Utc>,
}

impl From<&Device> for DeviceResponse {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id,
            credential_id: b64url_encode(&device.credential_id),
            algorithm: device.algorithm.as_str().to_string(),
            aaguid: device.aaguid,
            attestation_format: device.attestation_format.as_str().to_string(),
            transports: device.transports.clone(),
            status: device.status.as_str().to_string(),
            created_at: device.created_at,
        }
    }
}

/// Validate a client-supplied email address. Deliberately shallow: the real
/// guarantee comes from the enrollment ceremony, not the address syntax.
pub fn validate_email(email: &str) -> Result<&str, ApiError> {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 || !email.contains('@') {
        return Err(ApiError::bad_request("A valid email address is required"));
    }
    Ok(email)
}
