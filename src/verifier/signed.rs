//! Signed delegated-session tokens: a compact HS256-signed claims token whose
//! payload embeds an AEAD-sealed claims envelope (see `sealed`). The outer
//! signature, issuer, algorithm allow-list and expiry are all checked here;
//! the inner payload is then opened and carries its own independent expiry.

use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::claims::VerifiedClaims;
use crate::error::{AuthError, AuthResult};
use crate::now_ms;
use crate::verifier::sealed;

/// Outer token claims. `exp` follows the compact-token convention of epoch
/// seconds; the strict millisecond comparison happens in `verify`.
#[derive(Debug, Serialize, Deserialize)]
struct OuterClaims {
    iss: String,
    exp: i64,
    /// Sealed envelope: `"<b64 ciphertext>.<b64 tag>"`.
    ctx: String,
    /// Base64 nonce for the sealed envelope.
    nonce: String,
}

pub struct SignedVerifier {
    issuer: String,
    decoding_key: DecodingKey,
    sealing_key: [u8; 32],
}

impl SignedVerifier {
    pub fn new(issuer: impl Into<String>, signing_key: &[u8], sealing_key: [u8; 32]) -> Self {
        Self {
            issuer: issuer.into(),
            decoding_key: DecodingKey::from_secret(signing_key),
            sealing_key,
        }
    }

    pub fn verify(&self, raw: &str) -> AuthResult<VerifiedClaims> {
        // Algorithm allow-list first, from the raw header segment: only HS256
        // is acceptable. `alg=none` and asymmetric algorithms are downgrade
        // attempts and fail as SignatureInvalid, not Malformed.
        let alg = raw_token_alg(raw)?;
        if alg != "HS256" {
            return Err(AuthError::signature(format!("disallowed algorithm {alg}")));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is enforced below in strict epoch-ms terms.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        let data = jsonwebtoken::decode::<OuterClaims>(raw, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?;

        if data.claims.iss != self.issuer {
            return Err(AuthError::signature(format!(
                "issuer mismatch: {}",
                data.claims.iss
            )));
        }
        if now_ms() >= data.claims.exp.saturating_mul(1000) {
            return Err(AuthError::expired("outer token past expiry"));
        }
        // Defense in depth: the sealed payload re-checks its own expiry.
        sealed::open_claims(&self.sealing_key, &data.claims.ctx, &data.claims.nonce)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::signature("outer token signature invalid"),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AuthError::signature("disallowed algorithm")
        }
        _ => AuthError::malformed(format!("outer token: {err}")),
    }
}

/// Read the `alg` field from the raw (unverified) header segment. Used only
/// for the allow-list check; trust is established by the signature check.
fn raw_token_alg(raw: &str) -> AuthResult<String> {
    let header_b64 = raw
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::malformed("token has no header segment"))?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| AuthError::malformed("token header not base64url"))?;
    let header: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|_| AuthError::malformed("token header not JSON"))?;
    header
        .get("alg")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| AuthError::malformed("token header missing alg"))
}

/// Issue a signed delegated-session token. This is the host-side counterpart
/// of `SignedVerifier`; tests and token-minting services share it.
pub fn issue_delegated_token(
    issuer: &str,
    signing_key: &[u8],
    sealing_key: &[u8; 32],
    claims: &VerifiedClaims,
    outer_ttl_secs: i64,
) -> AuthResult<String> {
    let envelope = sealed::seal_claims(sealing_key, claims)?;
    let outer = OuterClaims {
        iss: issuer.to_string(),
        exp: now_ms() / 1000 + outer_ttl_secs,
        ctx: envelope.payload,
        nonce: envelope.nonce_b64,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &outer,
        &EncodingKey::from_secret(signing_key),
    )
    .map_err(|e| AuthError::internal(format!("token encode: {e}")))
}
