//! API integration tests for aegis-server.
//!
//! These drive the five protocol operations end to end through the HTTP
//! router with an in-memory backend and a software authenticator producing
//! real ES256 ceremonies, then assert on both the responses and the audit
//! trail.

mod support;

use axum::http::StatusCode;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

use aegis_server::{create_router, AuditAction};
use support::*;

// ============================================================================
// Health & Readiness
// ============================================================================

#[tokio::test]
async fn test_health_and_ready() {
    let app = create_router(test_state());

    let (status, body) = get_json(&app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "aegis-server");

    let (status, body) = get_json(&app, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

// ============================================================================
// Enrollment
// ============================================================================

#[tokio::test]
async fn test_enroll_start_returns_options_with_stored_challenge() {
    let state = test_state();
    let app = create_router(state.clone());

    let (status, body) = post_json(
        &app,
        "/auth/enroll/start",
        json!({ "email": "alice@example.com", "display_name": "Alice" }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["challenge_id"].is_string());
    assert_eq!(body["public_key"]["rp"]["id"], TEST_RP_ID);
    assert_eq!(body["public_key"]["attestation"], "none");
    assert_eq!(body["public_key"]["user"]["name"], "alice@example.com");

    // The options carry a decodable nonce and the server holds exactly one
    // pending challenge for it.
    let nonce =
        aegis_core::b64url_decode(body["public_key"]["challenge"].as_str().unwrap()).unwrap();
    assert_eq!(nonce.len(), 32);
    assert_eq!(state.challenges.pending_count().await.unwrap(), 1);

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].action, AuditAction::EnrollmentStarted);
    assert!(events[0].success);
}

#[tokio::test]
async fn test_enroll_start_rejects_invalid_email() {
    let app = create_router(test_state());
    let (status, body) =
        post_json(&app, "/auth/enroll/start", json!({ "email": "nope" }), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_full_enrollment_issues_device_and_tokens() {
    let state = test_state();
    let app = create_router(state.clone());

    let (_, finish) = enroll(&app, "alice@example.com").await;

    assert_eq!(finish["account"]["email"], "alice@example.com");
    assert_eq!(finish["account"]["role"], "customer");
    assert_eq!(finish["device"]["status"], "active");
    assert_eq!(finish["device"]["algorithm"], "ES256");
    assert_eq!(finish["tokens"]["token_type"], "Bearer");
    assert_eq!(finish["tokens"]["expires_in"], 3600);

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].action, AuditAction::EnrollmentCompleted);
    assert!(events[0].success);
}

#[tokio::test]
async fn test_enroll_finish_with_tampered_challenge_fails_generically() {
    let state = test_state();
    let app = create_router(state.clone());

    let (_, start) = post_json(
        &app,
        "/auth/enroll/start",
        json!({ "email": "alice@example.com" }),
        None,
    )
    .await;
    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap();

    let authenticator = VirtualAuthenticator::new();
    let credential = tamper_client_data_challenge(authenticator.attestation(challenge_b64));

    let (status, body) = post_json(
        &app,
        "/auth/enroll/finish",
        json!({ "challenge_id": start["challenge_id"], "credential": credential }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    // The external message is generic; the audit event carries the detail.
    assert_eq!(body["error"], "authentication failed");

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].action, AuditAction::EnrollmentFailed);
    assert!(!events[0].success);
    assert_eq!(
        events[0].error_code.as_deref(),
        Some("ATTESTATION_VERIFICATION_FAILED")
    );
}

#[tokio::test]
async fn test_enroll_finish_with_wrong_origin_fails_generically() {
    let state = test_state();
    let app = create_router(state.clone());

    let (_, start) = post_json(
        &app,
        "/auth/enroll/start",
        json!({ "email": "alice@example.com" }),
        None,
    )
    .await;
    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap();

    let authenticator = VirtualAuthenticator::new();
    let credential = authenticator.attestation_with(challenge_b64, "https://evil.example.com");

    let (status, body) = post_json(
        &app,
        "/auth/enroll/finish",
        json!({ "challenge_id": start["challenge_id"], "credential": credential }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "authentication failed");

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(
        events[0].error_code.as_deref(),
        Some("ATTESTATION_VERIFICATION_FAILED")
    );
}

#[tokio::test]
async fn test_enroll_finish_challenge_is_single_use() {
    let app = create_router(test_state());

    let (_, start) = post_json(
        &app,
        "/auth/enroll/start",
        json!({ "email": "alice@example.com" }),
        None,
    )
    .await;
    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap().to_string();

    let authenticator = VirtualAuthenticator::new();
    let credential = authenticator.attestation(&challenge_b64);

    let (status, _) = post_json(
        &app,
        "/auth/enroll/finish",
        json!({ "challenge_id": start["challenge_id"], "credential": credential.clone() }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same challenge id again: consumed, fails closed with the generic
    // challenge message.
    let (status, body) = post_json(
        &app,
        "/auth/enroll/finish",
        json!({ "challenge_id": start["challenge_id"], "credential": credential }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid or expired challenge");
}

#[tokio::test]
async fn test_cross_account_credential_reuse_rejected() {
    let state = test_state();
    let app = create_router(state.clone());

    let (authenticator, _) = enroll(&app, "alice@example.com").await;

    // Bob tries to enroll Alice's credential.
    let (_, start) = post_json(
        &app,
        "/auth/enroll/start",
        json!({ "email": "bob@example.com" }),
        None,
    )
    .await;
    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap();
    let credential = authenticator.attestation(challenge_b64);

    let (status, body) = post_json(
        &app,
        "/auth/enroll/finish",
        json!({ "challenge_id": start["challenge_id"], "credential": credential }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "authentication failed");

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].error_code.as_deref(), Some("CREDENTIAL_IN_USE"));
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_authenticate_start_with_no_devices_is_404_and_creates_no_challenge() {
    let state = test_state();
    let app = create_router(state.clone());

    let (status, body) = post_json(
        &app,
        "/auth/authenticate/start",
        json!({ "email": "ghost@example.com" }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no registered devices");
    assert_eq!(state.challenges.pending_count().await.unwrap(), 0);

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].action, AuditAction::AuthenticationStarted);
    assert!(!events[0].success);
    assert_eq!(events[0].error_code.as_deref(), Some("NO_REGISTERED_DEVICES"));
}

#[tokio::test]
async fn test_full_authentication_flow() {
    let state = test_state();
    let app = create_router(state.clone());

    let (mut authenticator, _) = enroll(&app, "alice@example.com").await;

    let (status, start) = post_json(
        &app,
        "/auth/authenticate/start",
        json!({ "email": "alice@example.com" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(start["allow_credentials"].as_array().unwrap().len(), 1);
    assert_eq!(start["public_key"]["rpId"], TEST_RP_ID);

    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap();
    let assertion = authenticator.assertion(challenge_b64);

    let (status, finish) = post_json(
        &app,
        "/auth/authenticate/finish",
        json!({ "challenge_id": start["challenge_id"], "assertion": assertion }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finish["account"]["email"], "alice@example.com");
    assert!(finish["tokens"]["access_token"].is_string());

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].action, AuditAction::AuthenticationCompleted);
}

#[tokio::test]
async fn test_replayed_counter_fails_authentication() {
    let state = test_state();
    let app = create_router(state.clone());

    let (mut authenticator, _) = enroll(&app, "alice@example.com").await;

    // Legitimate authentication moves the stored counter to 1.
    let (_, start) = post_json(
        &app,
        "/auth/authenticate/start",
        json!({ "email": "alice@example.com" }),
        None,
    )
    .await;
    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap();
    let assertion = authenticator.assertion(challenge_b64);
    let (status, _) = post_json(
        &app,
        "/auth/authenticate/finish",
        json!({ "challenge_id": start["challenge_id"], "assertion": assertion }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A cloned authenticator replays counter 1: valid signature, stale
    // counter.
    let (_, start) = post_json(
        &app,
        "/auth/authenticate/start",
        json!({ "email": "alice@example.com" }),
        None,
    )
    .await;
    let challenge_b64 = start["public_key"]["challenge"].as_str().unwrap();
    let stale = authenticator.assertion_with_count(challenge_b64, 1);

    let (status, body) = post_json(
        &app,
        "/auth/authenticate/finish",
        json!({ "challenge_id": start["challenge_id"], "assertion": stale }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "authentication failed");

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].action, AuditAction::AuthenticationFailed);
    assert_eq!(events[0].error_code.as_deref(), Some("COUNTER_REGRESSION"));
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn test_introspect_fresh_token_is_active_with_full_claims() {
    let state = test_state();
    let app = create_router(state.clone());

    let (_, finish) = enroll(&app, "alice@example.com").await;
    let access = finish["tokens"]["access_token"].as_str().unwrap();

    let (status, body) =
        post_json(&app, "/auth/introspect", json!({ "token": access }), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["sub"], finish["account"]["id"]);
    assert_eq!(body["device_id"], finish["device"]["id"]);
    assert_eq!(body["scope"], "storefront");
    assert_eq!(body["iss"], "https://auth.aegis.local");
    assert_eq!(body["aud"], "aegis-storefront");
    assert!(body["session_id"].is_string());
    assert!(body["cnf"]["jkt"].is_string());

    let events = state.audit.recent(10).await.unwrap();
    assert_eq!(events[0].action, AuditAction::TokenIntrospected);
    assert!(events[0].success);
}

#[tokio::test]
async fn test_introspect_accepts_bearer_header() {
    let app = create_router(test_state());
    let (_, finish) = enroll(&app, "alice@example.com").await;
    let access = finish["tokens"]["access_token"].as_str().unwrap();

    let (status, body) = post_json(&app, "/auth/introspect", json!({}), Some(access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
}

#[tokio::test]
async fn test_introspect_without_token_is_invalid_request() {
    let app = create_router(test_state());

    let (status, body) = post_json(&app, "/auth/introspect", json!({}), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "active": false, "error": "invalid_request" }));
}

#[tokio::test]
async fn test_introspect_expired_token_is_inactive_with_no_reason() {
    let app = create_router(test_state());

    // A well-formed token signed with the real key, expired an hour ago.
    let now = Utc::now().timestamp();
    let claims = json!({
        "ver": 1,
        "sub": uuid::Uuid::new_v4(),
        "device_id": uuid::Uuid::new_v4(),
        "session_id": uuid::Uuid::new_v4(),
        "iss": "https://auth.aegis.local",
        "aud": "aegis-storefront",
        "scope": "storefront",
        "iat": now - 7200,
        "nbf": now - 7200,
        "exp": now - 3600,
        "cnf": { "jkt": "x" },
        "token_use": "access",
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key-1".to_string());
    let token = encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(PRIVATE_PEM).unwrap(),
    )
    .unwrap();

    let (status, body) =
        post_json(&app, "/auth/introspect", json!({ "token": token }), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "active": false }));
}

#[tokio::test]
async fn test_introspect_garbage_token_is_inactive() {
    let app = create_router(test_state());
    let (status, body) = post_json(
        &app,
        "/auth/introspect",
        json!({ "token": "not-a-jwt" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "active": false }));
}

// ============================================================================
// Sessions & devices
// ============================================================================

#[tokio::test]
async fn test_logout_makes_token_inactive_immediately() {
    let app = create_router(test_state());
    let (_, finish) = enroll(&app, "alice@example.com").await;
    let access = finish["tokens"]["access_token"].as_str().unwrap();

    let (status, body) = post_json(&app, "/auth/logout", json!({}), Some(access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], true);

    let (_, body) = post_json(&app, "/auth/introspect", json!({ "token": access }), None).await;
    assert_eq!(body["active"], false);
}

#[tokio::test]
async fn test_refresh_rotation_and_replay_revokes_session() {
    let app = create_router(test_state());
    let (_, finish) = enroll(&app, "alice@example.com").await;
    let refresh = finish["tokens"]["refresh_token"].as_str().unwrap();

    // Rotate once.
    let (status, rotated) = post_json(
        &app,
        "/auth/token/refresh",
        json!({ "refresh_token": refresh }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = rotated["tokens"]["access_token"].as_str().unwrap();

    let (_, body) = post_json(
        &app,
        "/auth/introspect",
        json!({ "token": new_access }),
        None,
    )
    .await;
    assert_eq!(body["active"], true);

    // Replay the superseded refresh token: 401, and the session dies.
    let (status, _) = post_json(
        &app,
        "/auth/token/refresh",
        json!({ "refresh_token": refresh }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = post_json(
        &app,
        "/auth/introspect",
        json!({ "token": new_access }),
        None,
    )
    .await;
    assert_eq!(body["active"], false);
}

#[tokio::test]
async fn test_device_revocation_invalidates_unexpired_token() {
    let state = test_state();
    let app = create_router(state.clone());

    let (_, finish) = enroll(&app, "alice@example.com").await;
    let access = finish["tokens"]["access_token"].as_str().unwrap();
    let device_id = finish["device"]["id"].as_str().unwrap();

    let (status, devices) = get_json(&app, "/auth/devices", Some(access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices["devices"].as_array().unwrap().len(), 1);

    let (status, revoked) = post_json(
        &app,
        &format!("/auth/devices/{device_id}/revoke"),
        json!({ "reason": "device lost" }),
        Some(access),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked["status"], "revoked");

    // The still-unexpired access token is now inactive.
    let (_, body) = post_json(&app, "/auth/introspect", json!({ "token": access }), None).await;
    assert_eq!(body["active"], false);

    // Idempotent: revoking again via an admin-less owner path 401s (token
    // dead), so check through the registry directly.
    let device = state
        .devices
        .get(device_id.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    let again = state.devices.revoke(device.id, "again").await.unwrap();
    assert_eq!(again.revoked_reason.as_deref(), Some("device lost"));

    let events = state.audit.recent(10).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.action == AuditAction::TokenRevoked && e.success));
}

#[tokio::test]
async fn test_revoking_another_accounts_device_requires_admin() {
    let app = create_router(test_state());

    let (_, alice) = enroll(&app, "alice@example.com").await;
    let (_, bob) = enroll(&app, "bob@example.com").await;

    let alice_device = alice["device"]["id"].as_str().unwrap();
    let bob_access = bob["tokens"]["access_token"].as_str().unwrap();

    let (status, body) = post_json(
        &app,
        &format!("/auth/devices/{alice_device}/revoke"),
        json!({}),
        Some(bob_access),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_protected_route_without_token_is_401() {
    let app = create_router(test_state());
    let (status, body) = get_json(&app, "/auth/devices", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_MISSING_TOKEN");
}
