//! Canonical identity shapes produced by verification.
//! `VerifiedClaims` is the trust-established output of exactly one verifier;
//! `AuthContext` is the per-request projection the rest of the process consumes.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::now_ms;

/// Which verification strategy produced a context. Stamped for diagnostics and
/// for deciding whether a delegated access token is expected to be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrategy {
    SignedDelegated,
    ExternalIdentity,
    SessionLookup,
    AuthorityDelegated,
}

/// Decoded, trust-established claims from one verifier. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    pub subject_id: String,
    pub tenant_id: String,
    /// Defaults to false when the source credential omits the flag, never true.
    #[serde(default)]
    pub is_elevated: bool,
    /// Capability strings; may include wildcard segments ("chat:*", "*").
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Absolute expiry, epoch milliseconds. Strict: `now >= expires_at_ms` is expired.
    pub expires_at_ms: i64,
    /// Secondary credential obtained on the caller's behalf for calls to the
    /// protected resource. Only some strategies supply one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_access_token: Option<String>,
}

impl VerifiedClaims {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at_ms
    }
}

/// The canonical resolver-produced authorization context. Lifetime = one
/// request; never reuse a context across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub subject_id: String,
    pub tenant_id: String,
    pub is_elevated: bool,
    pub granted_capabilities: Vec<String>,
    pub expires_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_access_token: Option<String>,
    pub source: SourceStrategy,
}

impl AuthContext {
    /// Project verified claims into a context. Invariant: the expiry must be
    /// in the future at creation time, so an expired cache read can never leak
    /// through as a live context.
    pub fn project(claims: VerifiedClaims, source: SourceStrategy) -> AuthResult<Self> {
        if claims.is_expired(now_ms()) {
            return Err(AuthError::expired("claims expired at projection"));
        }
        Ok(Self {
            subject_id: claims.subject_id,
            tenant_id: claims.tenant_id,
            is_elevated: claims.is_elevated,
            granted_capabilities: claims.capabilities,
            expires_at_ms: claims.expires_at_ms,
            delegated_access_token: claims.delegated_access_token,
            source,
        })
    }
}
