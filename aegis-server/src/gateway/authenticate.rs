//! Authentication endpoints.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use aegis_core::{b64url_decode, verify_assertion, VerifierError};

use crate::account::Account;
use crate::audit::{AuditAction, AuditEvent};
use crate::challenge::{ChallengeError, ChallengePurpose};
use crate::device::DeviceStatus;
use crate::error::ApiError;
use crate::state::AppState;
use crate::token::TokenPair;

use super::options::{CredentialDescriptor, CredentialRequestOptions};
use super::{
    scope_for, validate_email, ClientMeta, MSG_INVALID_CHALLENGE, MSG_NO_DEVICES,
    MSG_VERIFICATION_FAILED,
};

/// Request to start authentication
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthenticateStartRequest {
    #[schema(example = "alice@example.com")]
    pub email: String,
}

/// Response containing the authentication challenge
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct AuthenticateStartResponse {
    #[schema(value_type = String)]
    pub challenge_id: Uuid,
    /// Options to pass to `navigator.credentials.get()`
    pub public_key: CredentialRequestOptions,
    /// The account's enrolled credentials
    pub allow_credentials: Vec<CredentialDescriptor>,
}

/// The authenticator's assertion response
#[derive(Debug, Deserialize, ToSchema)]
pub struct AssertionPayload {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    pub response: AssertionResponsePayload,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssertionResponsePayload {
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    #[serde(rename = "userHandle")]
    pub user_handle: Option<String>,
}

/// Request to complete authentication
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthenticateFinishRequest {
    #[schema(value_type = String)]
    pub challenge_id: Uuid,
    pub assertion: AssertionPayload,
}

/// Successful authentication: a fresh session
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct AuthenticateFinishResponse {
    pub tokens: TokenPair,
    pub account: Account,
}

/// POST /auth/authenticate/start
///
/// Fails with 404 before creating any challenge when the account is unknown
/// or has no active devices; the two cases are indistinguishable to the
/// caller.
#[utoipa::path(
    post,
    path = "/auth/authenticate/start",
    tag = "Authentication",
    request_body = AuthenticateStartRequest,
    responses(
        (status = 200, description = "Authentication challenge created", body = AuthenticateStartResponse),
        (status = 404, description = "No registered devices"),
        (status = 500, description = "Challenge storage unavailable")
    )
)]
pub async fn authenticate_start(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<AuthenticateStartRequest>,
) -> Result<Json<AuthenticateStartResponse>, ApiError> {
    let email = validate_email(&req.email)?;

    let devices = match state.accounts.find_by_email(email).await? {
        Some(account) => state.devices.for_account(account.id).await?,
        None => Vec::new(),
    };

    if devices.is_empty() {
        state
            .audit
            .record(
                AuditEvent::new(AuditAction::AuthenticationStarted, false)
                    .actor_email(email)
                    .client(meta.ip, meta.user_agent)
                    .resource("account", email)
                    .error_code("NO_REGISTERED_DEVICES"),
            )
            .await;
        return Err(ApiError::not_found(MSG_NO_DEVICES));
    }

    // All devices belong to the same account by construction.
    let account_id = devices[0].account_id;
    let issued = state
        .challenges
        .issue(account_id, ChallengePurpose::Authentication)
        .await?;

    let allow_credentials: Vec<CredentialDescriptor> = devices
        .iter()
        .map(CredentialDescriptor::from_device)
        .collect();
    let options = CredentialRequestOptions::new(
        &state.rp,
        &issued.nonce,
        state.config.challenge_ttl_secs,
        allow_credentials.clone(),
    );

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::AuthenticationStarted, true)
                .actor_email(email)
                .client(meta.ip, meta.user_agent)
                .resource("challenge", issued.id)
                .details(json!({ "allow_credentials": allow_credentials.len() })),
        )
        .await;

    tracing::info!(
        challenge_id = %issued.id,
        account_id = %account_id,
        devices = allow_credentials.len(),
        "Authentication started"
    );

    Ok(Json(AuthenticateStartResponse {
        challenge_id: issued.id,
        public_key: options,
        allow_credentials,
    }))
}

/// POST /auth/authenticate/finish
///
/// Consumes the challenge, verifies the assertion signature and the
/// monotonic signature counter against the enrolled device, and issues a
/// fresh token pair.
#[utoipa::path(
    post,
    path = "/auth/authenticate/finish",
    tag = "Authentication",
    request_body = AuthenticateFinishRequest,
    responses(
        (status = 200, description = "Authentication completed", body = AuthenticateFinishResponse),
        (status = 400, description = "Invalid challenge or assertion"),
        (status = 500, description = "Storage unavailable")
    )
)]
pub async fn authenticate_finish(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<AuthenticateFinishRequest>,
) -> Result<Json<AuthenticateFinishResponse>, ApiError> {
    let fail = |code: &str, reason: String| {
        AuditEvent::new(AuditAction::AuthenticationFailed, false)
            .client(meta.ip.clone(), meta.user_agent.clone())
            .resource("challenge", req.challenge_id)
            .error_code(code)
            .details(json!({ "reason": reason }))
    };

    let consumed = match state.challenges.consume(req.challenge_id).await {
        Ok(c) if c.purpose == ChallengePurpose::Authentication => c,
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
        AuditEvent::new(AuditAction::AuthenticationFailed, false)
            .actor_email(account.email.clone())
            .client(meta.ip.clone(), meta.user_agent.clone())
            .resource("challenge", req.challenge_id)
            .error_code(code)
            .details(json!({ "reason": reason }))
    };

    let decoded = b64url_decode(&req.assertion.raw_id)
        .zip(b64url_decode(&req.assertion.response.authenticator_data))
        .zip(b64url_decode(&req.assertion.response.client_data_json))
        .zip(b64url_decode(&req.assertion.response.signature));
    let Some((((credential_id, authenticator_data), client_data_json), signature)) = decoded
    else {
        state
            .audit
            .record(fail(
                "ASSERTION_VERIFICATION_FAILED",
                "assertion fields are not valid base64url".into(),
            ))
            .await;
        return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
    };

    // The credential must exist, belong to the account the challenge was
    // issued for, and still be active.
    let device = match state.devices.find_by_credential_id(&credential_id).await? {
        Some(device)
            if device.account_id == account.id && device.status == DeviceStatus::Active =>
        {
            device
        }
        Some(device) => {
            let code = if device.status == DeviceStatus::Revoked {
                "DEVICE_REVOKED"
            } else {
                "DEVICE_NOT_FOUND"
            };
            state
                .audit
                .record(fail(code, "credential not usable for this account".into()))
                .await;
            return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
        }
        None => {
            state
                .audit
                .record(fail(
                    "DEVICE_NOT_FOUND",
                    format!("unknown credential id {}", hex::encode(&credential_id)),
                ))
                .await;
            return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
        }
    };

    let verification = match verify_assertion(
        &state.rp,
        &authenticator_data,
        &client_data_json,
        &signature,
        &consumed.nonce,
        &device.public_key,
        device.sign_count,
    ) {
        Ok(v) => v,
        Err(e) => {
            let code = match &e {
                VerifierError::CounterRegression { .. } => "COUNTER_REGRESSION",
                _ => "ASSERTION_VERIFICATION_FAILED",
            };
            state
                .audit
                .record(fail(code, e.to_string()).actor_device(device.id))
                .await;
            return Err(ApiError::bad_request(MSG_VERIFICATION_FAILED));
        }
    };

    state
        .devices
        .record_sign_count(device.id, verification.sign_count)
        .await?;

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
            tracing::error!(error = %e, "Token issuance failed after authentication");
            ApiError::internal("Token issuance failed")
        })?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::AuthenticationCompleted, true)
                .actor_email(account.email.clone())
                .actor_device(device.id)
                .client(meta.ip.clone(), meta.user_agent.clone())
                .resource("device", device.id)
                .details(json!({
                    "sign_count": verification.sign_count,
                    "user_verified": verification.user_verified,
                })),
        )
        .await;

    tracing::info!(
        account_id = %account.id,
        device_id = %device.id,
        sign_count = verification.sign_count,
        "Authentication completed"
    );

    Ok(Json(AuthenticateFinishResponse { tokens, account }))
}
