//! Expiring classification cache keyed by [`FaultSignature`].
//!
//! ## Expiry
//!
//! Entries are never swept in the background. Expiry is evaluated on read:
//! an entry whose `cache_ttl` has elapsed is removed and reported as a miss,
//! and the next `put` for that signature stores a fresh decision.

use super::{Classification, FaultSignature};
use dashmap::DashMap;
use std::time::Instant;

/// A cached decision.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub signature: FaultSignature,
    pub classification: Classification,
    pub created_at: Instant,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.classification.cache_ttl
    }
}

/// Concurrent map from fault signature to its most recent classification.
///
/// Shared by every in-flight fetch; safe for concurrent reads and writes.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: DashMap<FaultSignature, CacheEntry>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live classification for the signature.
    pub fn get(&self, signature: &FaultSignature) -> Option<Classification> {
        self.get_at(signature, Instant::now())
    }

    /// Look up as of `now`. An expired entry is dropped and treated as a miss.
    pub fn get_at(&self, signature: &FaultSignature, now: Instant) -> Option<Classification> {
        let expired = match self.entries.get(signature) {
            Some(entry) if !entry.is_expired_at(now) => return Some(entry.classification),
            Some(_) => true,
            None => false,
        };

        if expired {
            // Re-check under the write lock: a concurrent put may have refreshed it.
            self.entries
                .remove_if(signature, |_, entry| entry.is_expired_at(now));
            tracing::debug!(%signature, "classification cache entry expired");
        }
        None
    }

    /// Store (or overwrite) the classification for a signature.
    pub fn put(&self, signature: FaultSignature, classification: Classification) {
        self.put_at(signature, classification, Instant::now());
    }

    pub fn put_at(
        &self,
        signature: FaultSignature,
        classification: Classification,
        created_at: Instant,
    ) {
        self.entries.insert(
            signature.clone(),
            CacheEntry {
                signature,
                classification,
                created_at,
            },
        );
    }

    /// Snapshot of the live entries, for diagnostics.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Number of stored entries (including expired ones not yet read).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{policy, FaultCategory, Severity, SuggestedAction};
    use std::sync::Arc;
    use std::time::Duration;

    fn handshake_sig() -> FaultSignature {
        FaultSignature::new("x.example", FaultCategory::TlsHandshake)
    }

    #[test]
    fn test_hit_before_ttl() {
        let cache = ClassificationCache::new();
        let created = Instant::now();
        let permanent = Classification::new(
            Severity::Permanent,
            SuggestedAction::Fallback,
            Duration::from_secs(3600),
        );
        cache.put_at(handshake_sig(), permanent, created);

        let later = created + Duration::from_secs(10);
        assert_eq!(cache.get_at(&handshake_sig(), later), Some(permanent));
    }

    #[test]
    fn test_miss_after_ttl() {
        let cache = ClassificationCache::new();
        let created = Instant::now();
        let short = policy(FaultCategory::Unrecognized);
        cache.put_at(handshake_sig(), short, created);

        let after = created + short.cache_ttl + Duration::from_millis(1);
        assert_eq!(cache.get_at(&handshake_sig(), after), None);
        // Expired entry is dropped on read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites_expired_entry() {
        let cache = ClassificationCache::new();
        let zero_ttl =
            Classification::new(Severity::Unknown, SuggestedAction::Retry, Duration::ZERO);
        cache.put(handshake_sig(), zero_ttl);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&handshake_sig()).is_none());

        let fresh = policy(FaultCategory::TlsHandshake);
        cache.put(handshake_sig(), fresh);
        assert_eq!(cache.get(&handshake_sig()), Some(fresh));
    }

    #[test]
    fn test_signatures_are_independent() {
        let cache = ClassificationCache::new();
        cache.put(handshake_sig(), policy(FaultCategory::TlsHandshake));
        let other = FaultSignature::new("x.example", FaultCategory::Timeout);
        assert!(cache.get(&other).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ClassificationCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..200 {
                        let host = format!("h{}.test", (i + j) % 5);
                        let sig = FaultSignature::new(&host, FaultCategory::Timeout);
                        if cache.get(&sig).is_none() {
                            cache.put(sig, policy(FaultCategory::Timeout));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 5);
    }
}
