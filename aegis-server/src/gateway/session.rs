//! Session and device management endpoints.

use axum::extract::Path;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::account::Role;
use crate::audit::{AuditAction, AuditEvent};
use crate::error::ApiError;
use crate::principal::{require_role, token_error_to_api, Principal};
use crate::state::AppState;
use crate::token::{TokenError, TokenPair};

use super::{ClientMeta, DeviceResponse};

/// Request to rotate a refresh token
#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// A rotated token pair
#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub tokens: TokenPair,
}

/// Logout confirmation
#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub revoked: bool,
}

/// The caller's active devices
#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceResponse>,
}

/// Request to revoke a device
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevokeDeviceRequest {
    #[schema(example = "device lost")]
    pub reason: Option<String>,
}

/// POST /auth/token/refresh
///
/// Refresh tokens are single-use: each rotation invalidates the presented
/// token. Replaying a superseded refresh token revokes the whole session.
#[utoipa::path(
    post,
    path = "/auth/token/refresh",
    tag = "Session",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token pair rotated", body = RefreshResponse),
        (status = 401, description = "Invalid, expired, or replayed refresh token")
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    match state.tokens.refresh(&req.refresh_token).await {
        Ok(tokens) => Ok(Json(RefreshResponse { tokens })),
        Err(TokenError::RefreshReplay(session_id)) => {
            state
                .audit
                .record(
                    AuditEvent::new(AuditAction::TokenRevoked, true)
                        .client(meta.ip, meta.user_agent)
                        .resource("session", session_id)
                        .error_code("REFRESH_REPLAY")
                        .details(json!({
                            "reason": "superseded refresh token presented; session revoked"
                        })),
                )
                .await;
            Err(ApiError::auth_error("AUTH_INVALID_TOKEN", "Token is invalid"))
        }
        Err(e) => Err(token_error_to_api(e)),
    }
}

/// POST /auth/logout
///
/// Revokes the caller's session. Permanent: the session's access and
/// refresh tokens are dead from this point on.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Session",
    responses(
        (status = 200, description = "Session revoked", body = LogoutResponse),
        (status = 401, description = "Missing or invalid bearer token")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    principal: Principal,
    meta: ClientMeta,
) -> Result<Json<LogoutResponse>, ApiError> {
    state
        .tokens
        .revoke_session(principal.session_id, "logout")
        .await
        .map_err(token_error_to_api)?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::TokenRevoked, true)
                .actor_device(principal.device_id)
                .client(meta.ip, meta.user_agent)
                .resource("session", principal.session_id)
                .details(json!({ "reason": "logout" })),
        )
        .await;

    Ok(Json(LogoutResponse { revoked: true }))
}

/// GET /auth/devices
///
/// Lists the caller's active devices.
#[utoipa::path(
    get,
    path = "/auth/devices",
    tag = "Session",
    responses(
        (status = 200, description = "Active devices", body = DeviceListResponse),
        (status = 401, description = "Missing or invalid bearer token")
    )
)]
pub async fn list_devices(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<DeviceListResponse>, ApiError> {
    let devices = state.devices.for_account(principal.account_id).await?;
    Ok(Json(DeviceListResponse {
        devices: devices.iter().map(DeviceResponse::from).collect(),
    }))
}

/// POST /auth/devices/{device_id}/revoke
///
/// Revokes a device and every session bound to it. Idempotent. Owners may
/// revoke their own devices; anything else requires the admin role.
#[utoipa::path(
    post,
    path = "/auth/devices/{device_id}/revoke",
    tag = "Session",
    params(("device_id" = String, Path, description = "Device id")),
    request_body = RevokeDeviceRequest,
    responses(
        (status = 200, description = "Device revoked", body = DeviceResponse),
        (status = 403, description = "Not the owner and not an admin"),
        (status = 404, description = "Unknown device")
    )
)]
pub async fn revoke_device(
    State(state): State<AppState>,
    principal: Principal,
    meta: ClientMeta,
    Path(device_id): Path<Uuid>,
    Json(req): Json<RevokeDeviceRequest>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let device = state
        .devices
        .get(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Device not found"))?;

    if device.account_id != principal.account_id {
        require_role(&principal, Role::Admin)?;
    }

    let reason = req.reason.as_deref().unwrap_or("revoked by owner");
    let revoked = state
        .devices
        .revoke(device_id, reason)
        .await
        .map_err(|e| match e {
            crate::device::RegistryError::NotFound => ApiError::not_found("Device not found"),
            crate::device::RegistryError::Storage(e) => ApiError::from(e),
            crate::device::RegistryError::CredentialInUse => {
                ApiError::internal("Unexpected registry state")
            }
        })?;

    let sessions_revoked = state
        .tokens
        .revoke_sessions_for_device(device_id, "device revoked")
        .await
        .map_err(token_error_to_api)?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::TokenRevoked, true)
                .actor_device(principal.device_id)
                .client(meta.ip, meta.user_agent)
                .resource("device", device_id)
                .details(json!({
                    "reason": reason,
                    "sessions_revoked": sessions_revoked,
                })),
        )
        .await;

    tracing::info!(
        device_id = %device_id,
        sessions_revoked,
        "Device revoked"
    );

    Ok(Json(DeviceResponse::from(&revoked)))
}
