//! Digest cache: TTL plus a servable-but-stale window, atomic
//! replace-on-write.
//!
//! One writer (the aggregation run), many readers. Entries are swapped
//! whole as `Arc`s, so a reader either sees the previous sealed digest or
//! the new one, never a half-written state. The stale window is measured
//! from store time and clamped to never undercut the expiry. Revalidation
//! is not the cache's business: readers that see `Stale` ask the scheduler
//! for a coalesced refresh and keep the stale copy, trading briefly
//! outdated data for a bounded response time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::Digest;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub digest: Arc<Digest>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub stale_until: DateTime<Utc>,
}

/// Read outcome: fresh hit, servable-but-stale hit, or nothing usable.
#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(Arc<CacheEntry>),
    Stale(Arc<CacheEntry>),
    Miss,
}

impl Lookup {
    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            Lookup::Fresh(e) | Lookup::Stale(e) => Some(e),
            Lookup::Miss => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }
}

#[derive(Default)]
pub struct DigestCache {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &self,
        key: &str,
        digest: Digest,
        ttl: Duration,
        stale_window: Duration,
    ) -> Arc<CacheEntry> {
        self.put_at(key, digest, ttl, stale_window, Utc::now())
    }

    /// Deterministic variant with an injected clock.
    pub fn put_at(
        &self,
        key: &str,
        digest: Digest,
        ttl: Duration,
        stale_window: Duration,
        now: DateTime<Utc>,
    ) -> Arc<CacheEntry> {
        let expires_at = now + to_delta(ttl);
        // Clamp so stale_until >= expires_at always holds.
        let stale_until = (now + to_delta(stale_window)).max(expires_at);

        let entry = Arc::new(CacheEntry {
            key: key.to_string(),
            digest: Arc::new(digest),
            stored_at: now,
            expires_at,
            stale_until,
        });

        let mut guard = self.entries.write().expect("rwlock poisoned");
        guard.insert(key.to_string(), Arc::clone(&entry));
        entry
    }

    pub fn get(&self, key: &str) -> Lookup {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Lookup {
        let guard = self.entries.read().expect("rwlock poisoned");
        match guard.get(key) {
            None => Lookup::Miss,
            Some(entry) => {
                if now < entry.expires_at {
                    Lookup::Fresh(Arc::clone(entry))
                } else if now < entry.stale_until {
                    Lookup::Stale(Arc::clone(entry))
                } else {
                    Lookup::Miss
                }
            }
        }
    }

    /// Drop entries past their stale window. Called from the refresh loop;
    /// reads already treat them as misses.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.entries.write().expect("rwlock poisoned");
        let before = guard.len();
        guard.retain(|_, e| now < e.stale_until);
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_delta(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}
