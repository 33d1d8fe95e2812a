//! Bearer authentication boundary
//!
//! The single entry point the rest of the application uses to authenticate
//! requests: a [`Principal`] extractor that verifies the bearer token and
//! resolves the account's role, plus the pure [`require_role`] predicate.
//! Protected storefront and admin routes never talk to the token service
//! directly.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::account::Role;
use crate::error::ApiError;
use crate::state::AppState;
use crate::token::TokenError;

/// The authenticated caller of a protected route.
#[derive(Debug, Clone)]
pub struct Principal {
    pub account_id: Uuid,
    pub role: Role,
    pub device_id: Uuid,
    pub session_id: Uuid,
}

/// Pure role predicate, no I/O.
///
/// Admin satisfies every requirement; otherwise the roles must match.
/// Returns 403, never 401 - an authenticated caller with the wrong role is
/// an authorization failure and must not be conflated with authentication.
pub fn require_role(principal: &Principal, role: Role) -> Result<(), ApiError> {
    if principal.role == Role::Admin || principal.role == role {
        Ok(())
    } else {
        Err(ApiError::forbidden("Insufficient role for this operation"))
    }
}

/// Extract the Bearer token from the Authorization header
pub fn extract_bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let auth_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| {
            ApiError::auth_error("AUTH_MISSING_TOKEN", "Missing Authorization header")
        })?;

    let auth_value = auth_header.to_str().map_err(|_| {
        ApiError::auth_error(
            "AUTH_INVALID_TOKEN",
            "Invalid Authorization header encoding",
        )
    })?;

    auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::auth_error(
            "AUTH_INVALID_TOKEN",
            "Authorization header must use Bearer scheme",
        )
    })
}

/// Map a token verification failure to its 401 response.
///
/// The code is machine-readable for the caller; the message stays generic.
pub fn token_error_to_api(err: TokenError) -> ApiError {
    match err {
        TokenError::Expired => ApiError::auth_error("AUTH_TOKEN_EXPIRED", "Token has expired"),
        TokenError::SessionInvalid => {
            ApiError::auth_error("AUTH_SESSION_REVOKED", "Session is no longer valid")
        }
        TokenError::DeviceInactive => {
            ApiError::auth_error("AUTH_DEVICE_REVOKED", "Device is no longer enrolled")
        }
        TokenError::UnknownKeyId(_) => {
            ApiError::auth_error("AUTH_UNKNOWN_KEY", "Token signed with unknown key")
        }
        TokenError::Storage(e) => ApiError::from(e),
        TokenError::Keys(e) => ApiError::internal(e),
        TokenError::Malformed | TokenError::Invalid | TokenError::RefreshReplay(_) => {
            ApiError::auth_error("AUTH_INVALID_TOKEN", "Token is invalid")
        }
    }
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(parts)?;

        let claims = state
            .tokens
            .verify_access(token)
            .await
            .map_err(token_error_to_api)?;

        let account = state
            .accounts
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                ApiError::auth_error(
                    "AUTH_ACCOUNT_NOT_FOUND",
                    "Valid token but account not found",
                )
            })?;

        Ok(Principal {
            account_id: account.id,
            role: account.role,
            device_id: claims.device_id,
            session_id: claims.session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            account_id: Uuid::new_v4(),
            role,
            device_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_require_role_exact_match() {
        assert!(require_role(&principal(Role::Customer), Role::Customer).is_ok());
    }

    #[test]
    fn test_admin_satisfies_any_role() {
        assert!(require_role(&principal(Role::Admin), Role::Customer).is_ok());
        assert!(require_role(&principal(Role::Admin), Role::Admin).is_ok());
    }

    #[test]
    fn test_customer_cannot_act_as_admin() {
        let err = require_role(&principal(Role::Customer), Role::Admin).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_extract_bearer_token_success() {
        let (parts, _) = axum::http::Request::builder()
            .header("Authorization", "Bearer my-token")
            .body(())
            .unwrap()
            .into_parts();

        assert_eq!(extract_bearer_token(&parts).unwrap(), "my-token");
    }

    #[test]
    fn test_extract_bearer_token_missing_header() {
        let (parts, _) = axum::http::Request::builder()
            .body(())
            .unwrap()
            .into_parts();

        let err = extract_bearer_token(&parts).unwrap_err();
        match err {
            ApiError::AuthError { code, .. } => assert_eq!(code, "AUTH_MISSING_TOKEN"),
            other => panic!("Expected AuthError with AUTH_MISSING_TOKEN, got: {:?}", other),
        }
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let (parts, _) = axum::http::Request::builder()
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap()
            .into_parts();

        let err = extract_bearer_token(&parts).unwrap_err();
        match err {
            ApiError::AuthError { code, .. } => assert_eq!(code, "AUTH_INVALID_TOKEN"),
            other => panic!("Expected AuthError with AUTH_INVALID_TOKEN, got: {:?}", other),
        }
    }
}
