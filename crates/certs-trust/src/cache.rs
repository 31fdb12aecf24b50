//! Time- and size-bounded cache of remotely fetched documents, keyed by URI.
//!
//! # Purpose
//! Memoize key sets and trust lists so that validation keeps working through
//! short network outages and does not hammer publishers.
//!
//! # Key invariants
//! - An entry is replaced wholesale (value, timestamp and size together); a
//!   reader sees either the old entry or the new one.
//! - Total cached bytes never exceed `max_bytes` after a successful insert.
//!   Older entries are evicted first to make room; an entry that alone exceeds
//!   the ceiling is refused.
//! - After a failed fetch, an entry older than `failure_grace` is evicted
//!   instead of being served.
//!
//! # Concurrency model
//! Entries live in a `DashMap`, so single-entry operations are atomic with
//! respect to concurrent readers. Eviction decisions are made entry by entry;
//! two racing inserts may briefly overshoot the ceiling.
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

const DEFAULT_STALE_SECS: u64 = 3600;
const DEFAULT_FAILURE_GRACE_SECS: u64 = 24 * 3600;
const DEFAULT_MAX_BYTES: usize = 20_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Entries younger than this may be served without waiting on a fetch.
    pub stale_after: Duration,
    /// How long past its fetch time an entry may stand in for a failed fetch.
    pub failure_grace: Duration,
    pub max_bytes: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(DEFAULT_STALE_SECS),
            failure_grace: Duration::from_secs(DEFAULT_FAILURE_GRACE_SECS),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
    pub size_bytes: usize,
}

impl<T> CacheEntry<T> {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        // Entries stamped in the future count as brand new.
        (now - self.fetched_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct DocumentCache<T> {
    name: &'static str,
    policy: CachePolicy,
    entries: DashMap<String, CacheEntry<T>>,
}

impl<T: Clone> DocumentCache<T> {
    /// `name` labels log lines and metrics (`key_sets`, `trusted_lists`).
    pub fn new(name: &'static str, policy: CachePolicy) -> Self {
        Self {
            name,
            policy,
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn get(&self, uri: &str) -> Option<CacheEntry<T>> {
        self.entries.get(uri).map(|entry| entry.value().clone())
    }

    /// Cached value if it is younger than the stale window.
    pub fn get_fresh(&self, uri: &str) -> Option<T> {
        self.get_fresh_within(uri, self.policy.stale_after)
    }

    pub fn get_fresh_within(&self, uri: &str, max_age: Duration) -> Option<T> {
        let now = Utc::now();
        let entry = self.entries.get(uri)?;
        let fresh = entry.age(now) < max_age;
        tracing::trace!(cache = self.name, uri, fresh, "cache lookup");
        fresh.then(|| entry.value.clone())
    }

    pub fn is_fresh(&self, uri: &str) -> bool {
        let now = Utc::now();
        self.entries
            .get(uri)
            .is_some_and(|entry| entry.age(now) < self.policy.stale_after)
    }

    /// Insert or replace the entry for `uri`, stamped now.
    ///
    /// Returns `false` when the entry alone is larger than the ceiling; the
    /// caller may still use the value, it just is not memoized.
    pub fn put(&self, uri: &str, value: T, size_bytes: usize) -> bool {
        self.put_at(uri, value, size_bytes, Utc::now())
    }

    pub fn put_at(
        &self,
        uri: &str,
        value: T,
        size_bytes: usize,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        if size_bytes > self.policy.max_bytes {
            tracing::warn!(
                cache = self.name,
                uri,
                size_bytes,
                max_bytes = self.policy.max_bytes,
                "refusing to cache document larger than the cache ceiling"
            );
            metrics::counter!("certs_cache_refused_total", "cache" => self.name).increment(1);
            return false;
        }

        // The entry being replaced does not count against the new one.
        while self.bytes_excluding(uri) + size_bytes > self.policy.max_bytes {
            if !self.evict_oldest_except(Some(uri)) {
                break;
            }
            metrics::counter!(
                "certs_cache_evictions_total",
                "cache" => self.name,
                "reason" => "size"
            )
            .increment(1);
        }

        let replaced = self
            .entries
            .insert(
                uri.to_string(),
                CacheEntry {
                    value,
                    fetched_at,
                    size_bytes,
                },
            )
            .is_some();
        tracing::debug!(cache = self.name, uri, size_bytes, replaced, "cached document");
        true
    }

    /// Evict the entry with the oldest fetch time. `false` if the cache is empty.
    pub fn evict_oldest(&self) -> bool {
        self.evict_oldest_except(None)
    }

    fn evict_oldest_except(&self, keep: Option<&str>) -> bool {
        let oldest = self
            .entries
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != keep)
            .min_by_key(|entry| entry.fetched_at)
            .map(|entry| entry.key().clone());
        let Some(uri) = oldest else {
            return false;
        };
        let removed = self.entries.remove(&uri).is_some();
        if removed {
            tracing::debug!(cache = self.name, uri = %uri, "evicted oldest cache entry");
        }
        removed
    }

    /// Called after a failed fetch: drop the entry if it has outlived the
    /// failure grace window. Returns `true` if an entry was removed.
    pub fn prune_if_expired_on_failure(&self, uri: &str) -> bool {
        let now = Utc::now();
        let grace = self.policy.failure_grace;
        let removed = self
            .entries
            .remove_if(uri, |_, entry| entry.age(now) > grace)
            .is_some();
        if removed {
            tracing::info!(
                cache = self.name,
                uri,
                "fetch failed and cached copy is past the failure grace window, evicting it"
            );
            metrics::counter!(
                "certs_cache_evictions_total",
                "cache" => self.name,
                "reason" => "failure_grace"
            )
            .increment(1);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.size_bytes).sum()
    }

    fn bytes_excluding(&self, uri: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key() != uri)
            .map(|entry| entry.size_bytes)
            .sum()
    }
}
