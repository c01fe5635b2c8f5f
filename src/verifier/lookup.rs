//! Opaque session keys carried in the signed session cookie. The cookie value
//! is `key.mac`; the MAC is checked before the key is used for a store
//! lookup. The key itself has no intrinsic structure, so a store miss is a
//! malformed credential, never an expiry.

use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

use crate::claims::VerifiedClaims;
use crate::error::{AuthError, AuthResult};
use crate::now_ms;

type HmacSha256 = Hmac<Sha256>;

/// External session record store. Synchronous by design: only the
/// remote-authority verifier suspends on network I/O.
pub trait SessionRecordStore: Send + Sync {
    fn fetch(&self, session_key: &str) -> Option<VerifiedClaims>;
}

/// Produce a signed cookie value `key.mac` for a session key.
pub fn sign_cookie_value(cookie_key: &[u8], session_key: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(cookie_key).expect("hmac accepts any key length");
    mac.update(session_key.as_bytes());
    let tag = mac.finalize().into_bytes();
    format!(
        "{}.{}",
        session_key,
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag)
    )
}

fn open_signed_cookie(cookie_key: &[u8], value: &str) -> AuthResult<String> {
    let Some((session_key, mac_b64)) = value.rsplit_once('.') else {
        return Err(AuthError::malformed("signed cookie: missing mac segment"));
    };
    let provided = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(mac_b64)
        .map_err(|_| AuthError::malformed("signed cookie: mac not base64url"))?;
    let mut mac = HmacSha256::new_from_slice(cookie_key).expect("hmac accepts any key length");
    mac.update(session_key.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| AuthError::signature("signed cookie: mac mismatch"))?;
    Ok(session_key.to_string())
}

pub struct LookupVerifier {
    cookie_key: Vec<u8>,
    store: Arc<dyn SessionRecordStore>,
}

impl LookupVerifier {
    pub fn new(cookie_key: Vec<u8>, store: Arc<dyn SessionRecordStore>) -> Self {
        Self { cookie_key, store }
    }

    pub fn verify(&self, cookie_value: &str) -> AuthResult<VerifiedClaims> {
        let session_key = open_signed_cookie(&self.cookie_key, cookie_value)?;
        let Some(claims) = self.store.fetch(&session_key) else {
            // An unknown random key is structurally worthless, not expired.
            return Err(AuthError::malformed("unknown session key"));
        };
        if claims.is_expired(now_ms()) {
            return Err(AuthError::expired("session record past expiry"));
        }
        Ok(claims)
    }
}

/// In-process store used by the server binary and tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    records: RwLock<HashMap<String, VerifiedClaims>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_key: impl Into<String>, claims: VerifiedClaims) {
        self.records.write().insert(session_key.into(), claims);
    }

    pub fn remove(&self, session_key: &str) {
        self.records.write().remove(session_key);
    }
}

impl SessionRecordStore for InMemorySessionStore {
    fn fetch(&self, session_key: &str) -> Option<VerifiedClaims> {
        self.records.read().get(session_key).cloned()
    }
}
