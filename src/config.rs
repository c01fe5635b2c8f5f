//! Explicit configuration for the credential subsystem.
//! Built once at process start and handed to the resolver by value; nothing in
//! this crate reaches for ambient global configuration.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use std::time::Duration;

/// Default header carrying the service API key on authority verify calls.
pub const DEFAULT_AUTHORITY_KEY_HEADER: &str = "x-verify-api-key";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Expected issuer claim on signed delegated-session tokens.
    pub issuer: String,
    /// HS256 secret for the outer signed token.
    pub signing_key: Vec<u8>,
    /// AES-256-GCM key for the embedded sealed payload. Exactly 32 bytes.
    pub sealing_key: [u8; 32],
    /// HMAC-SHA256 key for the signed session cookie.
    pub cookie_key: Vec<u8>,
    /// Remote authority base URL, e.g. "https://authority.example.com".
    pub authority_base_url: String,
    /// Service-held API key sent on every authority verify call.
    pub authority_api_key: String,
    /// Header name the authority expects the API key under.
    pub authority_key_header: String,
    /// Hard timeout on the authority verify call.
    pub authority_timeout: Duration,
    /// Session cache entry cap; oldest entries are evicted past this.
    pub cache_capacity: usize,
}

fn decode_b64(label: &str, s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .with_context(|| format!("{label}: invalid base64"))
}

impl AuthConfig {
    /// Build from base64-encoded key material, validating lengths up front so
    /// a misconfigured process fails at startup rather than per-request.
    pub fn new(
        issuer: impl Into<String>,
        signing_key_b64: &str,
        sealing_key_b64: &str,
        cookie_key_b64: &str,
        authority_base_url: impl Into<String>,
        authority_api_key: impl Into<String>,
    ) -> Result<Self> {
        let signing_key = decode_b64("signing_key", signing_key_b64)?;
        if signing_key.is_empty() {
            return Err(anyhow!("signing_key: must not be empty"));
        }
        let sealing = decode_b64("sealing_key", sealing_key_b64)?;
        let sealing_key: [u8; 32] = sealing
            .try_into()
            .map_err(|v: Vec<u8>| anyhow!("sealing_key: expected 32 bytes, got {}", v.len()))?;
        let cookie_key = decode_b64("cookie_key", cookie_key_b64)?;
        if cookie_key.is_empty() {
            return Err(anyhow!("cookie_key: must not be empty"));
        }
        Ok(Self {
            issuer: issuer.into(),
            signing_key,
            sealing_key,
            cookie_key,
            authority_base_url: authority_base_url.into(),
            authority_api_key: authority_api_key.into(),
            authority_key_header: DEFAULT_AUTHORITY_KEY_HEADER.to_string(),
            authority_timeout: Duration::from_secs(5),
            cache_capacity: 1024,
        })
    }

    /// Environment-driven construction for the server binary.
    /// CREDGATE_ISSUER, CREDGATE_SIGNING_KEY, CREDGATE_SEALING_KEY,
    /// CREDGATE_COOKIE_KEY, CREDGATE_AUTHORITY_URL, CREDGATE_AUTHORITY_API_KEY.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).with_context(|| format!("missing env var {name}"))
        };
        Self::new(
            var("CREDGATE_ISSUER")?,
            &var("CREDGATE_SIGNING_KEY")?,
            &var("CREDGATE_SEALING_KEY")?,
            &var("CREDGATE_COOKIE_KEY")?,
            var("CREDGATE_AUTHORITY_URL")?,
            var("CREDGATE_AUTHORITY_API_KEY")?,
        )
    }
}
