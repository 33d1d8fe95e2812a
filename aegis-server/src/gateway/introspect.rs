//! Token introspection (RFC 7662 shape).

use axum::http::{HeaderMap, StatusCode};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent};
use crate::error::ApiError;
use crate::state::AppState;
use crate::token::{Claims, Cnf, TokenError};

use super::ClientMeta;

/// Introspection request body. The token may also arrive as a Bearer header.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IntrospectRequest {
    pub token: Option<String>,
}

/// RFC 7662-shaped introspection response.
///
/// For an inactive token only `active` (and, for malformed requests,
/// `error`) is present; no field reveals why the token is inactive.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub sub: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub device_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub cnf: Option<Cnf>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self::default()
    }

    fn invalid_request() -> Self {
        Self {
            error: Some("invalid_request".to_string()),
            ..Self::default()
        }
    }

    fn active(claims: Claims) -> Self {
        Self {
            active: true,
            error: None,
            scope: Some(claims.scope),
            sub: Some(claims.sub),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            nbf: Some(claims.nbf),
            aud: Some(claims.aud),
            iss: Some(claims.iss),
            device_id: Some(claims.device_id),
            session_id: Some(claims.session_id),
            cnf: Some(claims.cnf),
        }
    }
}

/// POST /auth/introspect
///
/// Resource servers check whether a token is currently active. A token for a
/// revoked session or device is inactive even when unexpired. Malformed
/// requests (no token anywhere) get 400 `invalid_request`; every other
/// failure is a plain `{"active": false}` with no explanation.
#[utoipa::path(
    post,
    path = "/auth/introspect",
    tag = "Introspection",
    request_body = IntrospectRequest,
    responses(
        (status = 200, description = "Introspection result", body = IntrospectionResponse),
        (status = 400, description = "Missing token", body = IntrospectionResponse),
        (status = 500, description = "Storage unavailable")
    )
)]
pub async fn introspect(
    State(state): State<AppState>,
    meta: ClientMeta,
    headers: HeaderMap,
    Json(req): Json<IntrospectRequest>,
) -> Result<(StatusCode, Json<IntrospectionResponse>), ApiError> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string());

    let Some(token) = req.token.or(bearer).filter(|t| !t.is_empty()) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(IntrospectionResponse::invalid_request()),
        ));
    };

    match state.tokens.verify_access(&token).await {
        Ok(claims) => {
            state
                .audit
                .record(
                    AuditEvent::new(AuditAction::TokenIntrospected, true)
                        .actor_device(claims.device_id)
                        .client(meta.ip, meta.user_agent)
                        .resource("session", claims.session_id),
                )
                .await;
            Ok((StatusCode::OK, Json(IntrospectionResponse::active(claims))))
        }
        // Infrastructure failures must surface as 500, never as a silent
        // "inactive" verdict.
        Err(TokenError::Storage(e)) => Err(ApiError::from(e)),
        Err(e) => {
            state
                .audit
                .record(
                    AuditEvent::new(AuditAction::TokenIntrospected, false)
                        .client(meta.ip, meta.user_agent)
                        .resource("token", "-")
                        .details(json!({ "reason": e.to_string() })),
                )
                .await;
            Ok((StatusCode::OK, Json(IntrospectionResponse::inactive())))
        }
    }
}
