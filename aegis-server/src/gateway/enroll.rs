//! Enrollment endpoints.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use aegis_core::{b64url_decode, verify_attestation};

use crate::account::Account;
use crate::audit::{AuditAction, AuditEvent};
use crate::challenge::{ChallengeError, ChallengePurpose};
use crate::device::{NewDevice, RegistryError};
use crate::error::ApiError;
use crate::state::AppState;
use crate::token::TokenPair;

use super::options::CredentialCreationOptions;
use super::{
    scope_for, validate_email, ClientMeta, DeviceResponse, MSG_INVALID_CHALLENGE,
    MSG_VERIFICATION_FAILED,
};

/// Request to start enrollment
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrollStartRequest {
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[schema(example = "Alice")]
    pub display_name: Option<String>,
}

/// Response containing the registration challenge
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct EnrollStartResponse {
    #[schema(value_type = String)]
    pub challenge_id: Uuid,
    /// Options to pass to `navigator.credentials.create()`
    pub public_key: CredentialCreationOptions,
}

/// The authenticator's registration response
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrollCredential {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    pub response: AttestationResponse,
    pub transports: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttestationResponse {
    /// CBOR attestation object, base64url
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
    /// Collected client data, base64url
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
}

/// Request to complete enrollment
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrollFinishRequest {
    #[schema(value_type = String)]
    pub challenge_id: Uuid,
    pub credential: EnrollCredential,
}

/// Successful enrollment: the new device plus a first session
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct EnrollFinishResponse {
    pub device: DeviceResponse,
    pub tokens: TokenPair,
    pub account: Account,
}

/// POST /auth/enroll/start
///
/// Creates the account when it does not exist yet, issues a registration
/// challenge, and returns the credential creation options for the browser
/// ceremony.
#[utoipa::path(
    post,
    path = "/auth/enroll/start",
    tag = "Enrollment",
    request_body = EnrollStartRequest,
    responses(
        (status = 200, description = "Registration challenge created", body = EnrollStartResponse),
        (status = 400, description = "Invalid email"),
        (status = 500, description = "Challenge storage unavailable")
    )
)]
pub async fn enroll_start(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<EnrollStartRequest>,
) -> Result<Json<EnrollStartResponse>, ApiError> {
    let email = validate_email(&req.email)?;

    let account = state
        .accounts
        .find_or_create(email, req.display_name.as_deref())
        .await?;
    let existing = state.devices.for_account(account.id).await?;

    let issued = state
        .challenges
        .issue(account.id, ChallengePurpose::Registration)
        .await?;

    let options = CredentialCreationOptions::new(
        &state.rp,
        &account,
        &issued.nonce,
        state.config.challenge_ttl_secs,
        &existing,
    );

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::EnrollmentStarted, true)
                .actor_email(email)
                .client(meta.ip, meta.user_agent)
                .resource("challenge", issued.id),
        )
        .await;

    tracing::info!(
        challenge_id = %issued.id,
        account_id = %account.id,
        "Enrollment started"
    );

    Ok(Json(EnrollStartResponse {
        challenge_id: issued.id,
        public_key: options,
    }))
}

/// POST /auth/enroll/finish
///
/// Consumes the challenge, verifies the attestation, registers the device,
/// and issues the first token pair for the account + device.
#[utoipa::path(
    post,
    path = "/auth/enroll/finish",
    tag = "Enrollment",
    request_body = EnrollFinishRequest,
    responses(
        (status = 200, description = "Enrollment completed", body = EnrollFinishResponse),
        (status = 400, description = "Invalid challenge or attestation"),
        (status = 500, description = "Storage unavailable")
    )
)]
pub async fn enroll_finish(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<EnrollFinishRequest>,
) -> Result<Json<EnrollFinishResponse>, ApiError> {
    let fail = |code: &str, reason: String| {
        AuditEvent::new(AuditAction::EnrollmentFailed, false)
            .client(meta.ip.clone(), meta.user_agent.clone())
            .resource("challenge", req.challenge_id)
            .error_code(code)
            .details(json!({ "reason": reason }))
    };

    // Consume exactly once; purpose must match the flow being finished.
    let consumed = match state.challenges.consume(req.challenge_id).await {
        Ok(c) if c.purpose == ChallengePurpose::Registration => c,
        Ok(_) | Err(ChallengeError::InvalidOrExpired) => {
            state
                .audit
                .record(fail("CHALLENGE_INVALID", "challenge unknown, expired, consumed, or wrong purpose".into()))
                .await;
            return Err(ApiError::bad_request(MSG_INVALID_CHALLENGE));
        }
        Err(ChallengeError::Storage(e)) => {
            state
                .audit
                .record(fail("STORAGE_FAILURE", e.to_string()))
                .await;
            return Err(ApiError::from(e));
        }
    };

    let account = state
        .accounts
        .find_by_id(consumed.account_id)
        .await?
        .ok_or_else(|| ApiError::internal("Challenge references a missing account"))?;

    let fail = |code: &str, reason: String| {
        AuditEvent::new(AuditAction::EnrollmentFailed, false)
            .actor_email(account.email.clone())
            .client(meta.ip.clone(), meta.user_agent.clone())
            .resource("challenge", req.challenge_id)
            .error_code(code)
            .details(json!({ "reason": reason }))
    };

    // Decode the wire fields; structural failures get the same generic
    // outcome as cryptographic ones.
    let decoded = b64url_decode(&req.credential.response.attestation_object)
        .zip(b64url_decode(&req.credential.response.client_data_json))
        .zip(b64url_decode(&req.credential.raw_id));
    let Some(((attestation_object, client_data_json), raw_credential_id)) = decoded else {
        state
            .audit
            .record(fail(
                "ATTESTATION_VERIFICATION_FAILED",
                "credential fields are not valid base64url".into(),
            ))
            .await;
        return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
    };

    let attested = match verify_attestation(
        &state.rp,
        &attestation_object,
        &client_data_json,
        &consumed.nonce,
    ) {
        Ok(attested) => attested,
        Err(e) => {
            state
                .audit
                .record(fail("ATTESTATION_VERIFICATION_FAILED", e.to_string()))
                .await;
            return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
        }
    };

    if attested.credential_id != raw_credential_id {
        state
            .audit
            .record(fail(
                "ATTESTATION_VERIFICATION_FAILED",
                "credential id does not match attested credential".into(),
            ))
            .await;
        return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
    }

    let device = match state
        .devices
        .register(NewDevice {
            account_id: account.id,
            credential_id: attested.credential_id.clone(),
            public_key: attested.public_key_cose.clone(),
            algorithm: attested.algorithm,
            aaguid: attested.aaguid,
            attestation_format: attested.format,
            raw_attestation: attestation_object,
            transports: req.credential.transports.clone().unwrap_or_default(),
            sign_count: attested.sign_count,
        })
        .await
    {
        Ok(device) => device,
        Err(RegistryError::CredentialInUse) => {
            state
                .audit
                .record(fail(
                    "CREDENTIAL_IN_USE",
                    "credential public key or id already registered".into(),
                ))
                .await;
            return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
        }
        Err(RegistryError::NotFound) => {
            return Err(ApiError::internal("Unexpected registry state"));
        }
        Err(RegistryError::Storage(e)) => {
            state
                .audit
                .record(fail("STORAGE_FAILURE", e.to_string()))
                .await;
            return Err(ApiError::from(e));
        }
    };

    let tokens = state
        .tokens
        .issue(
            account.id,
            device.id,
            &device.public_key,
            scope_for(account.role),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Token issuance failed after enrollment");
            ApiError::internal("Token issuance failed")
        })?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::EnrollmentCompleted, true)
                .actor_email(account.email.clone())
                .actor_device(device.id)
                .client(meta.ip.clone(), meta.user_agent.clone())
                .resource("device", device.id)
                .details(json!({
                    "algorithm": device.algorithm.as_str(),
                    "aaguid": device.aaguid,
                    "attestation_format": device.attestation_format.as_str(),
                })),
        )
        .await;

    tracing::info!(
        account_id = %account.id,
        device_id = %device.id,
        "Enrollment completed"
    );

    Ok(Json(EnrollFinishResponse {
        device: DeviceResponse::from(&device),
        tokens,
        account,
    }))
}
