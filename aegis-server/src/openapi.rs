//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 specification for the Aegis authentication API.

use utoipa::OpenApi;

use crate::account::{Account, Role};
use crate::gateway::authenticate::{AssertionPayload, AssertionResponsePayload};
use crate::gateway::enroll::{AttestationResponse, EnrollCredential};
use crate::gateway::{
    AuthenticateFinishRequest, AuthenticateFinishResponse, AuthenticateStartRequest,
    AuthenticateStartResponse, CredentialCreationOptions, CredentialDescriptor,
    CredentialRequestOptions, DeviceListResponse, DeviceResponse, EnrollFinishRequest,
    EnrollFinishResponse, EnrollStartRequest, EnrollStartResponse, HealthResponse,
    IntrospectRequest, IntrospectionResponse, LogoutResponse, PubKeyCredParam, ReadyResponse,
    RefreshRequest, RefreshResponse, RevokeDeviceRequest, RpEntity, UserEntity,
};
use crate::token::TokenPair;

/// Aegis Authentication API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Aegis Authentication API",
        version = "0.1.0",
        description = r#"
## Passkey enrollment, authentication, and token introspection

Aegis is the authentication subsystem of the storefront: WebAuthn
(public-key credential) enrollment and authentication, internally issued
access/refresh tokens bound to the enrolled device key, RFC 7662-style
introspection for resource servers, and an append-only security audit trail.

### Flows

1. **Enroll** via `POST /auth/enroll/start` + `/finish` - creates the
   account on first use, registers the authenticator, returns tokens.
2. **Authenticate** via `POST /auth/authenticate/start` + `/finish` -
   proves control of an enrolled credential, returns tokens.
3. **Introspect** via `POST /auth/introspect` - resource servers check
   whether a token is active; revoked devices and sessions make otherwise
   valid tokens inactive.

Challenges are single-use and expire after 60 seconds. Refresh tokens are
single-use per rotation; replaying one revokes the session.
"#,
        license(
            name = "MIT OR Apache-2.0",
            url = "https://github.com/aegis-auth/aegis/blob/main/LICENSE"
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Enrollment", description = "Register a new authenticator for an account"),
        (name = "Authentication", description = "Authenticate with an enrolled authenticator"),
        (name = "Introspection", description = "RFC 7662-style token status checks"),
        (name = "Session", description = "Token refresh, logout, and device management"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::gateway::enroll::enroll_start,
        crate::gateway::enroll::enroll_finish,
        crate::gateway::authenticate::authenticate_start,
        crate::gateway::authenticate::authenticate_finish,
        crate::gateway::introspect::introspect,
        crate::gateway::session::refresh_token,
        crate::gateway::session::logout,
        crate::gateway::session::list_devices,
        crate::gateway::session::revoke_device,
        crate::gateway::health::health,
        crate::gateway::health::ready,
    ),
    components(
        schemas(
            Account,
            Role,
            EnrollStartRequest,
            EnrollStartResponse,
            EnrollFinishRequest,
            EnrollFinishResponse,
            EnrollCredential,
            AttestationResponse,
            AuthenticateStartRequest,
            AuthenticateStartResponse,
            AuthenticateFinishRequest,
            AuthenticateFinishResponse,
            AssertionPayload,
            AssertionResponsePayload,
            IntrospectRequest,
            IntrospectionResponse,
            RefreshRequest,
            RefreshResponse,
            LogoutResponse,
            RevokeDeviceRequest,
            DeviceListResponse,
            DeviceResponse,
            TokenPair,
            CredentialCreationOptions,
            CredentialRequestOptions,
            CredentialDescriptor,
            PubKeyCredParam,
            RpEntity,
            UserEntity,
            HealthResponse,
            ReadyResponse,
        )
    )
)]
pub struct ApiDoc;
