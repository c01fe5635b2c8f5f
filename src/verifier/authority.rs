//! API-key-delegated verification: the raw credential is sent to a remote
//! authority's verify endpoint together with a service-held API key. The
//! authority answers with the caller's identity, allowed APIs and a delegated
//! access token for the protected resource.
//!
//! This is the only verifier that suspends on network I/O. The call carries a
//! hard timeout and is never made while holding a cache lock.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::claims::VerifiedClaims;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyUser {
    subject_id: String,
    tenant_id: String,
    #[serde(default)]
    is_elevated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    verified: bool,
    user: Option<VerifyUser>,
    #[serde(default)]
    allowed_apis: Vec<String>,
    /// Epoch milliseconds.
    expires_at: Option<i64>,
    #[serde(default)]
    delegated_access_token: Option<String>,
}

pub struct RemoteAuthority {
    client: reqwest::Client,
    verify_url: String,
    api_key: String,
    key_header: String,
}

impl RemoteAuthority {
    pub fn new(cfg: &AuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.authority_timeout)
            .build()?;
        Ok(Self {
            client,
            verify_url: format!("{}/verify", cfg.authority_base_url.trim_end_matches('/')),
            api_key: cfg.authority_api_key.clone(),
            key_header: cfg.authority_key_header.clone(),
        })
    }

    /// Timeout override used where a caller needs a tighter bound than the
    /// config default.
    pub fn with_timeout(cfg: &AuthConfig, timeout: Duration) -> anyhow::Result<Self> {
        let mut cfg = cfg.clone();
        cfg.authority_timeout = timeout;
        Self::new(&cfg)
    }

    pub async fn verify(&self, raw: &str) -> AuthResult<VerifiedClaims> {
        let resp = self
            .client
            .post(&self.verify_url)
            .header(self.key_header.as_str(), self.api_key.as_str())
            .json(&VerifyRequest { token: raw })
            .send()
            .await
            .map_err(|e| {
                warn!(target: "auth", error = %e, "authority unreachable");
                AuthError::unreachable(format!("authority verify call failed: {e}"))
            })?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::denied("authority rejected credential"));
        }
        if !status.is_success() {
            warn!(target: "auth", status = %status, "authority verify returned failure status");
            return Err(AuthError::unreachable(format!(
                "authority verify returned {status}"
            )));
        }

        let body: VerifyResponse = resp.json().await.map_err(|e| {
            warn!(target: "auth", error = %e, "authority verify body undecodable");
            AuthError::unreachable(format!("authority verify body: {e}"))
        })?;

        if !body.verified {
            return Err(AuthError::denied("authority reported unverified"));
        }
        let user = body
            .user
            .ok_or_else(|| AuthError::unreachable("authority verify body missing user"))?;
        let expires_at_ms = body
            .expires_at
            .ok_or_else(|| AuthError::unreachable("authority verify body missing expiresAt"))?;
        Ok(VerifiedClaims {
            subject_id: user.subject_id,
            tenant_id: user.tenant_id,
            is_elevated: user.is_elevated,
            capabilities: body.allowed_apis,
            expires_at_ms,
            delegated_access_token: body.delegated_access_token,
        })
    }
}
