//! Client↔host wire messages for delegated-token negotiation. The shapes
//! mirror the host platform's window-level message protocol: a tagged `type`
//! field, camelCase payload fields, and an optional correlation id on host
//! responses (revocations may arrive unsolicited, with no id at all).

use serde::{Deserialize, Serialize};

/// Messages the embedded application sends to its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppMessage {
    /// Announcement on startup; no response expected.
    #[serde(rename = "APP_READY", rename_all = "camelCase")]
    Ready { app_id: String },
    /// Token negotiation, correlated by `request_id`.
    #[serde(rename = "AUTH_REQUEST", rename_all = "camelCase")]
    AuthRequest {
        app_id: String,
        request_id: String,
        payload: ScopeRequest,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRequest {
    pub scopes: Vec<String>,
}

/// Messages the host pushes to the embedded application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    #[serde(rename = "AUTH_TOKEN", rename_all = "camelCase")]
    AuthToken {
        request_id: Option<String>,
        payload: TokenGrant,
    },
    /// May arrive in response to a request or unsolicited at any time.
    #[serde(rename = "AUTH_REVOKED", rename_all = "camelCase")]
    AuthRevoked {
        #[serde(default)]
        request_id: Option<String>,
        payload: RevokeNotice,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub token: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeNotice {
    pub reason: String,
}

/// A host message together with the origin it arrived from. Origin pinning
/// happens before any message content is looked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvelope {
    pub origin: String,
    pub message: HostMessage,
}
