//! Token issuance, verification, refresh rotation, and revocation.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use aegis_core::key_thumbprint;

use crate::device::DeviceRegistry;

use super::claims::{Claims, Cnf, TokenUse, CLAIMS_VERSION};
use super::keys::TokenKeys;
use super::sessions::{SessionRecord, SessionStore};
use super::TokenError;

/// An issued access/refresh token pair.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds
    #[schema(example = 3600)]
    pub expires_in: u64,
}

/// Issues and verifies the service's own tokens.
pub struct TokenService {
    keys: TokenKeys,
    sessions: SessionStore,
    devices: Arc<DeviceRegistry>,
    issuer: String,
    audience: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenService {
    pub fn new(
        keys: TokenKeys,
        sessions: SessionStore,
        devices: Arc<DeviceRegistry>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        access_ttl_secs: u64,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            keys,
            sessions,
            devices,
            issuer: issuer.into(),
            audience: audience.into(),
            access_ttl_secs: access_ttl_secs as i64,
            refresh_ttl_secs: refresh_ttl_secs as i64,
        }
    }

    /// Mint a token pair for a fresh session bound to an account + device.
    ///
    /// The `cnf.jkt` claim is derived from the device's COSE public key so
    /// the tokens are useless for key-bound operations without the device.
    pub async fn issue(
        &self,
        account_id: Uuid,
        device_id: Uuid,
        device_public_key: &[u8],
        scope: &str,
    ) -> Result<TokenPair, TokenError> {
        let session_id = Uuid::new_v4();
        let refresh_jti = Uuid::new_v4();

        self.sessions
            .create(SessionRecord {
                session_id,
                account_id,
                device_id,
                refresh_jti,
                revoked: false,
                revoked_reason: None,
                created_at: Utc::now(),
            })
            .await?;

        let jkt = key_thumbprint(device_public_key);
        let pair = self.mint_pair(account_id, device_id, session_id, &jkt, scope, refresh_jti)?;

        tracing::info!(
            account_id = %account_id,
            device_id = %device_id,
            session_id = %session_id,
            "Token pair issued"
        );

        Ok(pair)
    }

    /// Verify an access token.
    ///
    /// Signature, expiry, not-before, issuer, and audience are checked with
    /// zero leeway, then the session revocation set and the device status.
    /// Tokens for revoked sessions or devices are invalid regardless of
    /// their own validity window.
    pub async fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode_claims(token)?;
        if claims.token_use != TokenUse::Access {
            return Err(TokenError::Invalid);
        }

        let session = self
            .sessions
            .get(claims.session_id)
            .await?
            .ok_or(TokenError::SessionInvalid)?;
        if session.revoked {
            return Err(TokenError::SessionInvalid);
        }
        if session.device_id != claims.device_id || session.account_id != claims.sub {
            return Err(TokenError::Invalid);
        }

        if !self.devices.is_active(claims.device_id).await? {
            return Err(TokenError::DeviceInactive);
        }

        Ok(claims)
    }

    /// Rotate a refresh token, returning a fresh pair.
    ///
    /// Refresh tokens are single-use: the presented rotation id must still
    /// be current. A superseded id is a replay signal; the whole session is
    /// revoked before the error is returned.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.decode_claims(refresh_token)?;
        if claims.token_use != TokenUse::Refresh {
            return Err(TokenError::Invalid);
        }
        let presented_jti = claims.jti.ok_or(TokenError::Invalid)?;

        let session = self
            .sessions
            .get(claims.session_id)
            .await?
            .ok_or(TokenError::SessionInvalid)?;
        if session.revoked {
            return Err(TokenError::SessionInvalid);
        }
        if !self.devices.is_active(claims.device_id).await? {
            return Err(TokenError::DeviceInactive);
        }

        let new_jti = Uuid::new_v4();
        let rotated = self
            .sessions
            .rotate_refresh(claims.session_id, presented_jti, new_jti)
            .await?;
        if !rotated {
            // The id was superseded by an earlier rotation: someone is
            // replaying an old refresh token. Kill the session.
            self.sessions
                .revoke(claims.session_id, "refresh token replay")
                .await?;
            tracing::warn!(
                session_id = %claims.session_id,
                device_id = %claims.device_id,
                "Refresh token replay detected; session revoked"
            );
            return Err(TokenError::RefreshReplay(claims.session_id));
        }

        self.mint_pair(
            claims.sub,
            claims.device_id,
            claims.session_id,
            &claims.cnf.jkt,
            &claims.scope,
            new_jti,
        )
    }

    /// Revoke a session. Permanent for that session id.
    pub async fn revoke_session(&self, session_id: Uuid, reason: &str) -> Result<bool, TokenError> {
        let existed = self.sessions.revoke(session_id, reason).await?;
        if existed {
            tracing::info!(session_id = %session_id, reason = reason, "Session revoked");
        }
        Ok(existed)
    }

    /// Revoke every session bound to a device.
    pub async fn revoke_sessions_for_device(
        &self,
        device_id: Uuid,
        reason: &str,
    ) -> Result<u64, TokenError> {
        let count = self.sessions.revoke_for_device(device_id, reason).await?;
        if count > 0 {
            tracing::info!(
                device_id = %device_id,
                sessions = count,
                reason = reason,
                "Device sessions revoked"
            );
        }
        Ok(count)
    }

    fn mint_pair(
        &self,
        account_id: Uuid,
        device_id: Uuid,
        session_id: Uuid,
        jkt: &str,
        scope: &str,
        refresh_jti: Uuid,
    ) -> Result<TokenPair, TokenError> {
        let now = Utc::now().timestamp();

        let base = Claims {
            ver: CLAIMS_VERSION,
            sub: account_id,
            device_id,
            session_id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            scope: scope.to_string(),
            iat: now,
            nbf: now,
            exp: now + self.access_ttl_secs,
            cnf: Cnf {
                jkt: jkt.to_string(),
            },
            token_use: TokenUse::Access,
            jti: None,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.keys.signing_kid().to_string());

        let access_token = encode(&header, &base, self.keys.encoding_key())
            .map_err(|e| TokenError::Keys(e.to_string()))?;

        let refresh_claims = Claims {
            exp: now + self.refresh_ttl_secs,
            token_use: TokenUse::Refresh,
            jti: Some(refresh_jti),
            ..base
        };
        let refresh_token = encode(&header, &refresh_claims, self.keys.encoding_key())
            .map_err(|e| TokenError::Keys(e.to_string()))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl_secs as u64,
        })
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        let kid = header.kid.ok_or(TokenError::Malformed)?;
        let key = self
            .keys
            .decoding_key_for(&kid)
            .ok_or(TokenError::UnknownKeyId(kid))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("keys", &self.keys)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}
