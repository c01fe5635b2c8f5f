//! Credential extraction from inbound request headers and cookies.
//! Pure, no I/O: walks a fixed priority order and returns the first non-empty
//! candidate. Absence of any credential is `None`, not an error; the route
//! decides whether anonymous access is acceptable.

use axum::http::HeaderMap;

/// Header explicitly issued for delegated-session tokens.
pub const DELEGATED_TOKEN_HEADER: &str = "x-delegated-token";
/// Deprecated alias kept for older embedded clients.
pub const LEGACY_TOKEN_HEADER: &str = "x-app-token";
/// Signed session cookie (`value.hmac`).
pub const SESSION_COOKIE: &str = "credgate_session";
/// Unsigned legacy cookie carrying a vendor token verified remotely.
pub const LEGACY_COOKIE: &str = "credgate_token";

/// Transport slot a credential was found in. The slot, not the token's shape,
/// determines which verification strategy runs: a token presented in the
/// wrong slot cannot route itself to a weaker check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportSlot {
    DelegatedHeader,
    LegacyDelegatedHeader,
    BearerHeader,
    SignedCookie,
    LegacyCookie,
}

/// An opaque credential string plus the slot it came from.
/// Created per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCredential {
    pub value: String,
    pub slot: TransportSlot,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let v = headers.get(name)?.to_str().ok()?.trim();
    if v.is_empty() { None } else { Some(v.to_string()) }
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                let v = &v[1..];
                if !v.is_empty() { return Some(v.to_string()); }
            }
        }
    }
    None
}

/// True when a bearer value is structurally a compact three-segment signed
/// claims token. The generic Authorization header may carry unrelated bearer
/// tokens; only JWT-shaped values are accepted from that slot.
pub fn looks_like_signed_claims_token(value: &str) -> bool {
    let mut segments = 0usize;
    for seg in value.split('.') {
        if seg.is_empty() { return false; }
        segments += 1;
    }
    segments == 3
}

/// Walk the transport slots in fixed priority order and return the first
/// non-empty credential.
///
/// The ordering is a security contract: the dedicated delegated-token headers
/// are explicitly issued for this subsystem and outrank the generic
/// `Authorization` header, which outranks cookies. See `TransportSlot` for the
/// slot→strategy binding rationale.
pub fn extract_credential(headers: &HeaderMap) -> Option<RawCredential> {
    if let Some(v) = header_value(headers, DELEGATED_TOKEN_HEADER) {
        return Some(RawCredential { value: v, slot: TransportSlot::DelegatedHeader });
    }
    if let Some(v) = header_value(headers, LEGACY_TOKEN_HEADER) {
        return Some(RawCredential { value: v, slot: TransportSlot::LegacyDelegatedHeader });
    }
    if let Some(auth) = header_value(headers, "authorization") {
        if let Some(bearer) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
            let bearer = bearer.trim();
            if looks_like_signed_claims_token(bearer) {
                return Some(RawCredential { value: bearer.to_string(), slot: TransportSlot::BearerHeader });
            }
        }
    }
    if let Some(v) = parse_cookie(headers, SESSION_COOKIE) {
        return Some(RawCredential { value: v, slot: TransportSlot::SignedCookie });
    }
    if let Some(v) = parse_cookie(headers, LEGACY_COOKIE) {
        return Some(RawCredential { value: v, slot: TransportSlot::LegacyCookie });
    }
    None
}
