//! Authenticated-encrypted payload embedded inside the signed delegated token.
//! Envelope format on the wire: one claim carries `"<b64 ciphertext>.<b64 tag>"`,
//! a sibling claim carries the base64 nonce. Both are required to reconstruct
//! the AEAD call; any bit flip in ciphertext, tag or nonce fails closed.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;

use crate::claims::VerifiedClaims;
use crate::error::{AuthError, AuthResult};
use crate::now_ms;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

fn b64() -> base64::engine::general_purpose::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Sealed payload plus the nonce that must travel beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    /// `"<b64 ciphertext>.<b64 tag>"`
    pub payload: String,
    pub nonce_b64: String,
}

/// Seal claims for embedding in a signed token. Each call draws a fresh
/// random nonce; nonces are never reused across messages.
pub fn seal_claims(key: &[u8; 32], claims: &VerifiedClaims) -> AuthResult<SealedEnvelope> {
    let plaintext = serde_json::to_vec(claims)
        .map_err(|e| AuthError::internal(format!("sealing serialization: {e}")))?;
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| AuthError::internal(format!("nonce entropy: {e}")))?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|_| AuthError::internal("aead seal failed"))?;
    // aes-gcm appends the 16-byte tag to the ciphertext; the wire format
    // carries them as separate base64 segments.
    let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
    Ok(SealedEnvelope {
        payload: format!("{}.{}", b64().encode(ct), b64().encode(tag)),
        nonce_b64: b64().encode(nonce),
    })
}

/// Open a sealed payload and re-check the embedded business-level expiry.
/// The outer signed token has its own expiry; both must be valid.
pub fn open_claims(key: &[u8; 32], payload: &str, nonce_b64: &str) -> AuthResult<VerifiedClaims> {
    let Some((ct_b64, tag_b64)) = payload.split_once('.') else {
        return Err(AuthError::malformed("sealed payload: missing tag segment"));
    };
    let ct = b64()
        .decode(ct_b64)
        .map_err(|_| AuthError::malformed("sealed payload: ciphertext not base64"))?;
    let tag = b64()
        .decode(tag_b64)
        .map_err(|_| AuthError::malformed("sealed payload: tag not base64"))?;
    if tag.len() != TAG_LEN {
        return Err(AuthError::malformed("sealed payload: bad tag length"));
    }
    let nonce = b64()
        .decode(nonce_b64)
        .map_err(|_| AuthError::malformed("sealed payload: nonce not base64"))?;
    if nonce.len() != NONCE_LEN {
        return Err(AuthError::malformed("sealed payload: bad nonce length"));
    }

    let mut sealed = ct;
    sealed.extend_from_slice(&tag);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
        .map_err(|_| AuthError::signature("sealed payload: authentication failed"))?;

    let claims: VerifiedClaims = serde_json::from_slice(&plaintext)
        .map_err(|_| AuthError::malformed("sealed payload: invalid claims JSON"))?;
    if claims.is_expired(now_ms()) {
        return Err(AuthError::expired("sealed payload past expiry"));
    }
    Ok(claims)
}
