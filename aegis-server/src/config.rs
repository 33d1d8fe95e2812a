//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible
//! defaults. Relying Party policy and token lifetimes live here so that the
//! gateway, challenge store, and token service all read one source of truth.

use std::net::SocketAddr;

use aegis_core::RelyingParty;
use zeroize::Zeroizing;

/// Server configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KB (default: 256 - auth payloads are small)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Relying Party ID (the effective domain credentials are scoped to)
    pub rp_id: String,
    /// Relying Party origin; client data origin must match this exactly
    pub rp_origin: String,
    /// Relying Party display name
    pub rp_name: String,
    /// Challenge time-to-live in seconds (default: 60, matching the
    /// WebAuthn ceremony timeout)
    pub challenge_ttl_secs: u64,
    /// Access token lifetime in seconds (default: 3600)
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds (default: 30 days)
    pub refresh_ttl_secs: u64,
    /// Token issuer claim
    pub issuer: String,
    /// Token audience claim
    pub audience: String,
    /// Key id written into token headers for rotation support
    pub signing_kid: String,
    /// RSA private key PEM for token signing (env only, zeroized on drop)
    pub signing_key_pem: Option<Zeroizing<String>>,
    /// RSA public key PEM matching the signing key
    pub signing_public_key_pem: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_kb: 256,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            rp_id: "localhost".to_string(),
            rp_origin: "http://localhost:3000".to_string(),
            rp_name: "Aegis".to_string(),
            challenge_ttl_secs: 60,
            access_ttl_secs: 3600,
            refresh_ttl_secs: 30 * 24 * 3600,
            issuer: "https://auth.aegis.local".to_string(),
            audience: "aegis-storefront".to_string(),
            signing_kid: "aegis-key-1".to_string(),
            signing_key_pem: None,
            signing_public_key_pem: None,
            database_max_connections: 20,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_parse("PORT", defaults.port);

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // Rate limiting enabled by default in production, can be disabled
        // with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let signing_key_pem = read_env_or_file("TOKEN_SIGNING_KEY", "TOKEN_SIGNING_KEY_FILE")
            .map(Zeroizing::new);
        let signing_public_key_pem =
            read_env_or_file("TOKEN_SIGNING_PUBLIC_KEY", "TOKEN_SIGNING_PUBLIC_KEY_FILE");

        Self {
            port,
            host,
            allowed_origins,
            body_limit_kb: env_parse("BODY_LIMIT_KB", defaults.body_limit_kb),
            timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            rp_id: env_string("WEBAUTHN_RP_ID", &defaults.rp_id),
            rp_origin: env_string("WEBAUTHN_RP_ORIGIN", &defaults.rp_origin),
            rp_name: env_string("WEBAUTHN_RP_NAME", &defaults.rp_name),
            challenge_ttl_secs: env_parse("CHALLENGE_TTL_SECS", defaults.challenge_ttl_secs),
            access_ttl_secs: env_parse("ACCESS_TOKEN_TTL_SECS", defaults.access_ttl_secs),
            refresh_ttl_secs: env_parse("REFRESH_TOKEN_TTL_SECS", defaults.refresh_ttl_secs),
            issuer: env_string("TOKEN_ISSUER", &defaults.issuer),
            audience: env_string("TOKEN_AUDIENCE", &defaults.audience),
            signing_kid: env_string("TOKEN_SIGNING_KID", &defaults.signing_kid),
            signing_key_pem,
            signing_public_key_pem,
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    /// Relying Party policy for ceremony verification
    pub fn relying_party(&self) -> RelyingParty {
        RelyingParty::new(&self.rp_id, &self.rp_origin, &self.rp_name)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("rp_id", &self.rp_id)
            .field("rp_origin", &self.rp_origin)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("signing_kid", &self.signing_kid)
            .field("challenge_ttl_secs", &self.challenge_ttl_secs)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("signing_key_pem", &self.signing_key_pem.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read a value from an environment variable, or from the file named by a
/// companion `*_FILE` variable (the usual container-secret convention).
fn read_env_or_file(var: &str, file_var: &str) -> Option<String> {
    if let Ok(value) = std::env::var(var) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    let path = std::env::var(file_var).ok()?;
    match std::fs::read_to_string(&path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Failed to read key file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.challenge_ttl_secs, 60);
        assert_eq!(config.access_ttl_secs, 3600);
        assert!(!config.rate_limit_enabled);
        assert!(config.signing_key_pem.is_none());
    }

    #[test]
    fn test_relying_party_from_config() {
        let config = Config::default();
        let rp = config.relying_party();
        assert_eq!(rp.id, "localhost");
        assert_eq!(rp.origin, "http://localhost:3000");
    }
}
