//! The verifier family: a closed set of verification strategies, one per
//! transport slot. The slot a credential arrived in determines which strategy
//! runs; strategies are never tried as alternatives against the same raw
//! value, so a token cannot be presented in the "wrong" slot to reach a
//! weaker check.

pub mod authority;
pub mod external;
pub mod lookup;
pub mod sealed;
pub mod signed;

use crate::claims::{SourceStrategy, VerifiedClaims};
use crate::error::AuthResult;
use crate::extract::{RawCredential, TransportSlot};

pub use authority::RemoteAuthority;
pub use external::{
    ExternalIdentity, ExternalVerifier, IdentityProvider, InMemoryProfileDirectory,
    JwtIdentityProvider, ProfileDirectory, ProfileRecord,
};
pub use lookup::{sign_cookie_value, InMemorySessionStore, LookupVerifier, SessionRecordStore};
pub use sealed::{open_claims, seal_claims, SealedEnvelope};
pub use signed::{issue_delegated_token, SignedVerifier};

/// Which strategy a transport slot is bound to.
pub fn strategy_for_slot(slot: TransportSlot) -> SourceStrategy {
    match slot {
        TransportSlot::DelegatedHeader | TransportSlot::LegacyDelegatedHeader => {
            SourceStrategy::SignedDelegated
        }
        TransportSlot::BearerHeader => SourceStrategy::ExternalIdentity,
        TransportSlot::SignedCookie => SourceStrategy::SessionLookup,
        TransportSlot::LegacyCookie => SourceStrategy::AuthorityDelegated,
    }
}

/// All verification strategies, constructed once and shared across requests.
pub struct VerifierSet {
    pub signed: SignedVerifier,
    pub external: ExternalVerifier,
    pub lookup: LookupVerifier,
    pub authority: RemoteAuthority,
}

impl VerifierSet {
    /// Run the single strategy bound to the credential's slot.
    pub async fn verify(&self, cred: &RawCredential) -> AuthResult<VerifiedClaims> {
        match cred.slot {
            TransportSlot::DelegatedHeader | TransportSlot::LegacyDelegatedHeader => {
                self.signed.verify(&cred.value)
            }
            TransportSlot::BearerHeader => self.external.verify(&cred.value),
            TransportSlot::SignedCookie => self.lookup.verify(&cred.value),
            TransportSlot::LegacyCookie => self.authority.verify(&cred.value).await,
        }
    }
}
