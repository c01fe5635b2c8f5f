//! The auth context resolver: one run per inbound request.
//! Extract a credential, consult the session cache, run the single verifier
//! bound to the credential's transport slot, populate the cache, and project
//! the canonical `AuthContext`. No credential at all is `Unauthenticated`, a
//! terminal non-error; any present-but-invalid credential surfaces with its
//! specific failure kind and is never silently ignored.

use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::cache::{credential_hash, SessionCache};
use crate::claims::AuthContext;
use crate::error::{AuthError, AuthResult};
use crate::extract::extract_credential;
use crate::verifier::{strategy_for_slot, VerifierSet};

/// Terminal outcome of one resolution run.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No credential in any transport slot. The route decides whether
    /// anonymous access is acceptable.
    Unauthenticated,
    Resolved(AuthContext),
}

impl Resolution {
    pub fn context(self) -> Option<AuthContext> {
        match self {
            Resolution::Resolved(ctx) => Some(ctx),
            Resolution::Unauthenticated => None,
        }
    }
}

/// Owns the session cache and the verifier set. Constructed once at process
/// start and shared by handle; resolution itself is request-scoped.
pub struct AuthResolver {
    cache: SessionCache,
    verifiers: VerifierSet,
}

impl AuthResolver {
    pub fn new(cache: SessionCache, verifiers: VerifierSet) -> Self {
        Self { cache, verifiers }
    }

    /// Resolve one request's headers into an authorization context.
    ///
    /// The cache is only consulted and populated here; the remote-authority
    /// verifier runs outside any cache lock.
    pub async fn resolve(&self, headers: &HeaderMap) -> AuthResult<Resolution> {
        let Some(cred) = extract_credential(headers) else {
            return Ok(Resolution::Unauthenticated);
        };
        let strategy = strategy_for_slot(cred.slot);
        let hash = credential_hash(&cred.value);

        // A hit only counts when the cached entry was produced by the same
        // strategy this slot is bound to; otherwise the slot's own verifier runs.
        if let Some(claims) = self.cache.get(hash, strategy) {
            debug!(target: "auth", subject = %claims.subject_id, ?strategy, "resolved from cache");
            return Ok(Resolution::Resolved(AuthContext::project(claims, strategy)?));
        }

        // Snapshot the revocation clock before verifying, so a revoke landing
        // during a slow verifier call wins over the late result.
        let epoch = self.cache.epoch();
        match self.verifiers.verify(&cred).await {
            Ok(claims) => {
                self.cache.put(hash, claims.clone(), strategy, epoch);
                debug!(target: "auth", subject = %claims.subject_id, ?strategy, "resolved via verifier");
                Ok(Resolution::Resolved(AuthContext::project(claims, strategy)?))
            }
            Err(err) => {
                // Unreachable and Denied both become 401 at the boundary;
                // keep them apart here for diagnostics.
                warn!(target: "auth", kind = err.kind_str(), slot = ?cred.slot, "verification failed");
                Err(err)
            }
        }
    }

    /// Push-based revocation: drop every cached entry for a subject so the
    /// next resolution re-verifies. Visible to all workers immediately.
    pub fn revoke_subject(&self, subject_id: &str) -> usize {
        self.cache.invalidate(subject_id)
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }
}
