//! Time-bounded memoization of verifier results keyed by raw credential.
//! Best-effort only: a hit is returned solely while the underlying claims are
//! still inside their validity window, and a revoke signal for a subject
//! removes every entry that resolved to that subject.
//!
//! Entries remember which verification strategy produced them; a hit is only
//! served back to the slot bound to that same strategy, so a credential
//! verified once cannot be replayed through a different transport slot to
//! skip that slot's verifier.
//!
//! The cache is an explicitly constructed instance owned by the resolver and
//! injected where needed; there is no process-wide global.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;
use xxhash_rust::xxh3::xxh3_64;

use crate::claims::{SourceStrategy, VerifiedClaims};
use crate::{now_ms, tprintln};

/// Cache key for a raw credential string. The raw value itself is never
/// stored, only its hash.
pub fn credential_hash(raw: &str) -> u64 {
    xxh3_64(raw.as_bytes())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    claims: VerifiedClaims,
    strategy: SourceStrategy,
    cached_at_ms: i64,
}

pub struct SessionCache {
    capacity: usize,
    entries: RwLock<HashMap<u64, CacheEntry>>,
    /// subject id -> credential hashes that resolved to it. Needed so
    /// `invalidate` can drop every credential for a subject, not just the one
    /// that triggered the revoke.
    subject_index: RwLock<HashMap<String, HashSet<u64>>>,
    /// Monotonic revocation clock. Bumped on every `invalidate`; `put`
    /// compares its caller's pre-verification snapshot against the subject's
    /// last-revoked tick so a revoke landing mid-verification is not undone
    /// by the verifier's late result.
    epoch: AtomicU64,
    subject_epochs: RwLock<HashMap<String, u64>>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
            subject_index: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            subject_epochs: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the revocation clock. Taken before running a verifier and
    /// handed back to `put`.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Fresh hit for the given strategy or nothing. Stale-but-present entries
    /// are treated as misses and removed on the spot; an entry produced by a
    /// different strategy is a miss but stays cached for its own slot.
    pub fn get(&self, hash: u64, strategy: SourceStrategy) -> Option<VerifiedClaims> {
        let now = now_ms();
        let stale_subject = {
            let map = self.entries.read();
            match map.get(&hash) {
                Some(ent) if ent.claims.is_expired(now) => Some(ent.claims.subject_id.clone()),
                Some(ent) if ent.strategy != strategy => {
                    tprintln!(
                        "cache.slot_mismatch hash={:x} cached={:?} requested={:?}",
                        hash, ent.strategy, strategy
                    );
                    return None;
                }
                Some(ent) => return Some(ent.claims.clone()),
                None => None,
            }
        };
        if let Some(subject) = stale_subject {
            self.remove_entry(hash, &subject);
            tprintln!("cache.expire subject={} hash={:x}", subject, hash);
        }
        None
    }

    /// Insert a verifier result. `observed_epoch` is the caller's snapshot
    /// from before verification started; if the subject was invalidated in
    /// the meantime the result is discarded rather than cached.
    pub fn put(
        &self,
        hash: u64,
        claims: VerifiedClaims,
        strategy: SourceStrategy,
        observed_epoch: u64,
    ) {
        let subject = claims.subject_id.clone();
        let mut map = self.entries.write();
        // Lock order everywhere: entries, then subject_epochs/subject_index.
        {
            let epochs = self.subject_epochs.read();
            if let Some(&revoked_at) = epochs.get(&subject) {
                if revoked_at > observed_epoch {
                    tprintln!("cache.put_discard subject={} revoked mid-verify", subject);
                    return;
                }
            }
        }
        if map.len() >= self.capacity && !map.contains_key(&hash) {
            // Evict the oldest entry to stay within the cap.
            if let Some((&old_hash, ent)) = map.iter().min_by_key(|(_, e)| e.cached_at_ms) {
                let old_subject = ent.claims.subject_id.clone();
                map.remove(&old_hash);
                let mut idx = self.subject_index.write();
                if let Some(set) = idx.get_mut(&old_subject) {
                    set.remove(&old_hash);
                    if set.is_empty() { idx.remove(&old_subject); }
                }
            }
        }
        map.insert(hash, CacheEntry { claims, strategy, cached_at_ms: now_ms() });
        // Index update happens while the entries lock is still held, so an
        // `invalidate` cannot slip between insert and index and miss the entry.
        let mut idx = self.subject_index.write();
        idx.entry(subject).or_default().insert(hash);
    }

    /// Remove all entries for a subject regardless of which raw credential
    /// produced them, and advance the revocation clock so in-flight
    /// verifications for the subject cannot re-populate. Returns the number
    /// of entries dropped.
    pub fn invalidate(&self, subject_id: &str) -> usize {
        let tick = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut map = self.entries.write();
        self.subject_epochs.write().insert(subject_id.to_string(), tick);
        let hashes = self.subject_index.write().remove(subject_id);
        let mut count = 0usize;
        if let Some(hashes) = hashes {
            for h in hashes {
                if map.remove(&h).is_some() { count += 1; }
            }
        }
        drop(map);
        tprintln!("cache.invalidate subject={} count={} tick={}", subject_id, count, tick);
        count
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_entry(&self, hash: u64, subject: &str) {
        self.entries.write().remove(&hash);
        let mut idx = self.subject_index.write();
        if let Some(set) = idx.get_mut(subject) {
            set.remove(&hash);
            if set.is_empty() { idx.remove(subject); }
        }
    }
}
