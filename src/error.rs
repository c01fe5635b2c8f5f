//! Unified verification-failure model and mapping helpers.
//! This module provides the failure taxonomy shared by every verifier, the
//! resolver and the scope guard, along with the HTTP boundary mapping.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Terminal failure kinds for credential verification and authorization.
///
/// "No credential present" is deliberately not an error: the resolver reports
/// it as `Resolution::Unauthenticated` and the route decides. Every kind here
/// means a credential WAS presented and must not be silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthError {
    /// Structurally invalid input (bad base64, wrong segment count, unknown session key).
    Malformed { message: String },
    /// Cryptographic check failed: bad signature, bad MAC, AEAD tag mismatch,
    /// or a disallowed signing algorithm.
    SignatureInvalid { message: String },
    /// Valid structure, past its validity window. Checked at two independent
    /// layers for sealed tokens: the outer signed token and the inner payload.
    Expired { message: String },
    /// The remote authority could not be contacted (network error, timeout, non-401 failure).
    Unreachable { message: String },
    /// The remote authority or directory explicitly rejected the credential.
    Denied { message: String },
    /// Authenticated but lacking required capabilities.
    ScopeInsufficient { missing: Vec<String> },
    /// Invariant breach inside the subsystem itself.
    Internal { message: String },
}

impl AuthError {
    pub fn kind_str(&self) -> &'static str {
        match self {
            AuthError::Malformed { .. } => "malformed",
            AuthError::SignatureInvalid { .. } => "signature_invalid",
            AuthError::Expired { .. } => "expired",
            AuthError::Unreachable { .. } => "unreachable",
            AuthError::Denied { .. } => "denied",
            AuthError::ScopeInsufficient { .. } => "scope_insufficient",
            AuthError::Internal { .. } => "internal",
        }
    }

    pub fn message(&self) -> String {
        match self {
            AuthError::Malformed { message }
            | AuthError::SignatureInvalid { message }
            | AuthError::Expired { message }
            | AuthError::Unreachable { message }
            | AuthError::Denied { message }
            | AuthError::Internal { message } => message.clone(),
            AuthError::ScopeInsufficient { missing } => {
                format!("missing capabilities: {}", missing.join(", "))
            }
        }
    }

    pub fn malformed<S: Into<String>>(msg: S) -> Self { AuthError::Malformed { message: msg.into() } }
    pub fn signature<S: Into<String>>(msg: S) -> Self { AuthError::SignatureInvalid { message: msg.into() } }
    pub fn expired<S: Into<String>>(msg: S) -> Self { AuthError::Expired { message: msg.into() } }
    pub fn unreachable<S: Into<String>>(msg: S) -> Self { AuthError::Unreachable { message: msg.into() } }
    pub fn denied<S: Into<String>>(msg: S) -> Self { AuthError::Denied { message: msg.into() } }
    pub fn scope(missing: Vec<String>) -> Self { AuthError::ScopeInsufficient { missing } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AuthError::Internal { message: msg.into() } }

    /// Map to HTTP status code at the outermost boundary.
    ///
    /// `Unreachable` and `Denied` both surface as 401 to the caller to avoid
    /// leaking which one occurred; they stay distinguishable in diagnostics
    /// via `kind_str`.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::Malformed { .. }
            | AuthError::SignatureInvalid { .. }
            | AuthError::Expired { .. }
            | AuthError::Unreachable { .. }
            | AuthError::Denied { .. } => 401,
            AuthError::ScopeInsufficient { .. } => 403,
            AuthError::Internal { .. } => 500,
        }
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind_str(), self.message())
    }
}

impl std::error::Error for AuthError {}

pub type AuthResult<T> = Result<T, AuthError>;
