//! Third-party identity tokens presented as `Authorization: Bearer`.
//! Signature and issuer validation is delegated to the identity provider's
//! own verification routine; the token alone carries no tenant context, so a
//! locally-known profile record keyed by the provider subject supplies tenant
//! id and capabilities.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::claims::VerifiedClaims;
use crate::error::{AuthError, AuthResult};
use crate::now_ms;

/// What the provider's verification routine establishes about the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider_subject: String,
    /// Token expiry as reported by the provider, epoch ms.
    pub expires_at_ms: i64,
}

/// A third-party identity provider's verification routine.
pub trait IdentityProvider: Send + Sync {
    fn verify_identity_token(&self, raw: &str) -> AuthResult<ExternalIdentity>;
}

/// Locally-known profile for a provider subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub subject_id: String,
    pub tenant_id: String,
    pub is_elevated: bool,
    pub capabilities: Vec<String>,
}

/// Lookup from provider subject id to local profile. Synchronous by design:
/// only the remote-authority verifier suspends on network I/O.
pub trait ProfileDirectory: Send + Sync {
    fn profile_for(&self, provider_subject: &str) -> Option<ProfileRecord>;
}

pub struct ExternalVerifier {
    provider: Arc<dyn IdentityProvider>,
    directory: Arc<dyn ProfileDirectory>,
}

impl ExternalVerifier {
    pub fn new(provider: Arc<dyn IdentityProvider>, directory: Arc<dyn ProfileDirectory>) -> Self {
        Self { provider, directory }
    }

    pub fn verify(&self, raw: &str) -> AuthResult<VerifiedClaims> {
        let identity = self.provider.verify_identity_token(raw)?;
        if now_ms() >= identity.expires_at_ms {
            return Err(AuthError::expired("identity token past expiry"));
        }
        let Some(profile) = self.directory.profile_for(&identity.provider_subject) else {
            // A verified identity with no local profile is an explicit
            // rejection, not a structural problem.
            return Err(AuthError::denied(format!(
                "no profile for provider subject {}",
                identity.provider_subject
            )));
        };
        Ok(VerifiedClaims {
            subject_id: profile.subject_id,
            tenant_id: profile.tenant_id,
            is_elevated: profile.is_elevated,
            capabilities: profile.capabilities,
            expires_at_ms: identity.expires_at_ms,
            delegated_access_token: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProviderClaims {
    iss: String,
    sub: String,
    exp: i64,
}

/// Identity provider backed by a static verification key, for providers that
/// publish one signing key rather than a rotating key set.
pub struct JwtIdentityProvider {
    issuer: String,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
}

impl JwtIdentityProvider {
    pub fn hs256(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
        }
    }

    pub fn rs256_pem(issuer: impl Into<String>, public_key_pem: &[u8]) -> AuthResult<Self> {
        Ok(Self {
            issuer: issuer.into(),
            decoding_key: DecodingKey::from_rsa_pem(public_key_pem)
                .map_err(|e| AuthError::internal(format!("provider key: {e}")))?,
            algorithm: Algorithm::RS256,
        })
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn verify_identity_token(&self, raw: &str) -> AuthResult<ExternalIdentity> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_exp = false;
        validation.validate_aud = false;
        let data = jsonwebtoken::decode::<ProviderClaims>(raw, &self.decoding_key, &validation)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::InvalidSignature => AuthError::signature("identity token signature invalid"),
                    ErrorKind::InvalidIssuer => AuthError::signature("identity token issuer mismatch"),
                    ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                        AuthError::signature("identity token algorithm rejected")
                    }
                    _ => AuthError::malformed(format!("identity token: {e}")),
                }
            })?;
        Ok(ExternalIdentity {
            provider_subject: data.claims.sub,
            expires_at_ms: data.claims.exp.saturating_mul(1000),
        })
    }
}

/// In-process directory used by the server binary and tests.
#[derive(Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<HashMap<String, ProfileRecord>>,
}

impl InMemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, provider_subject: impl Into<String>, profile: ProfileRecord) {
        self.profiles.write().insert(provider_subject.into(), profile);
    }
}

impl ProfileDirectory for InMemoryProfileDirectory {
    fn profile_for(&self, provider_subject: &str) -> Option<ProfileRecord> {
        self.profiles.read().get(provider_subject).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &[u8] = b"provider-secret";
    const ISSUER: &str = "https://id.example.com";

    #[derive(Serialize)]
    struct TokenClaims<'a> {
        iss: &'a str,
        sub: &'a str,
        exp: i64,
    }

    fn mint(iss: &str, sub: &str, exp_secs: i64) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &TokenClaims { iss, sub, exp: exp_secs },
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn directory_with(sub: &str) -> Arc<InMemoryProfileDirectory> {
        let dir = InMemoryProfileDirectory::new();
        dir.insert(
            sub,
            ProfileRecord {
                subject_id: "local-u1".into(),
                tenant_id: "t1".into(),
                is_elevated: false,
                capabilities: vec!["chat:read".into()],
            },
        );
        Arc::new(dir)
    }

    fn verifier(dir: Arc<InMemoryProfileDirectory>) -> ExternalVerifier {
        ExternalVerifier::new(Arc::new(JwtIdentityProvider::hs256(ISSUER, SECRET)), dir)
    }

    #[test]
    fn verified_token_maps_through_profile() {
        let exp = now_ms() / 1000 + 600;
        let token = mint(ISSUER, "ext-42", exp);
        let got = verifier(directory_with("ext-42")).verify(&token).unwrap();
        assert_eq!(got.subject_id, "local-u1");
        assert_eq!(got.tenant_id, "t1");
        assert_eq!(got.expires_at_ms, exp * 1000);
        assert!(got.delegated_access_token.is_none());
    }

    #[test]
    fn missing_profile_is_denied() {
        let token = mint(ISSUER, "stranger", now_ms() / 1000 + 600);
        let err = verifier(directory_with("ext-42")).verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::Denied { .. }));
    }

    #[test]
    fn issuer_mismatch_rejected_by_provider() {
        let token = mint("https://evil.example.com", "ext-42", now_ms() / 1000 + 600);
        let err = verifier(directory_with("ext-42")).verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid { .. }));
    }

    #[test]
    fn expired_identity_token_rejected() {
        let token = mint(ISSUER, "ext-42", now_ms() / 1000 - 10);
        let err = verifier(directory_with("ext-42")).verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::Expired { .. }));
    }
}
