//! Short-window rejection of repeated raw requests.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::params::Fingerprint;

pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(3);
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Remembers raw request fingerprints for a short time-to-live.
///
/// Shared by all request handlers; the check-and-record step happens under
/// one lock so two simultaneous identical requests cannot both pass.
#[derive(Debug)]
pub struct DeduplicationGate {
    entries: Mutex<LruCache<Fingerprint, Instant>>,
    ttl: Duration,
}

impl DeduplicationGate {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` if `key` was already recorded within the TTL. Otherwise
    /// records it and returns `false`.
    pub fn seen(&self, key: &Fingerprint) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(recorded) = entries.get(key) {
            if recorded.elapsed() < self.ttl {
                return true;
            }
        }
        entries.put(key.clone(), Instant::now());
        false
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeduplicationGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL, DEFAULT_DEDUP_CAPACITY)
    }
}
