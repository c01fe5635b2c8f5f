//! Authorization decision layer: does an AuthContext hold the capabilities a
//! protected operation requires? Re-evaluated per operation, never cached; a
//! context past its expiry is denied regardless of what it holds.

use crate::claims::AuthContext;
use crate::error::{AuthError, AuthResult};
use crate::now_ms;

/// A granted capability matches a required one when they are equal, when the
/// grant is a family wildcard (`chat:*` covers `chat:anything`), or when the
/// grant is the global wildcard `*`.
pub fn capability_matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    if let Some(family) = granted.strip_suffix(":*") {
        if let Some(rest) = required.strip_prefix(family) {
            return rest.starts_with(':');
        }
    }
    false
}

/// Gate a protected operation. Returns the missing capabilities on denial so
/// the boundary can report a precise 403.
pub fn authorize(ctx: &AuthContext, required: &[&str]) -> AuthResult<()> {
    if now_ms() >= ctx.expires_at_ms {
        return Err(AuthError::expired("context past expiry"));
    }
    let missing: Vec<String> = required
        .iter()
        .filter(|req| !ctx.granted_capabilities.iter().any(|g| capability_matches(g, req)))
        .map(|s| s.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AuthError::scope(missing))
    }
}
