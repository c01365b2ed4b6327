//! An in-process [`CacheStore`] backed by a mutex-guarded hash map.
//!
//! This is the workspace's always-available baseline backend — the same
//! role the teacher crate's `MokaManager` plays for client-side caching —
//! and it is also the backend the property and scenario tests in
//! `webcache-core` run against, since it can simulate arbitrary eviction
//! on demand via [`InMemoryStore::evict`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{AddOutcome, CacheStore, CasOutcome, CasToken, IncrOutcome, Result, StoredRecord};

struct Entry {
    bytes: Vec<u8>,
    token: CasToken,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|e| now >= e).unwrap_or(false)
    }
}

/// An in-memory, single-process [`CacheStore`].
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("len", &self.bytes.len()).finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        InMemoryStore { entries: Mutex::new(HashMap::new()), next_token: AtomicU64::new(1) }
    }

    /// Force-evict a key, simulating the store's arbitrary eviction
    /// behavior for tests that exercise spec §3's "either record may be
    /// evicted at any time" invariant.
    pub async fn evict(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Number of live (non-expired) entries. Test helper only.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().await.values().filter(|e| !e.is_expired(now)).count()
    }

    fn fresh_token(&self) -> CasToken {
        CasToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(entry) = entries.get(key) {
            if entry.is_expired(now) {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(StoredRecord { bytes: entry.bytes.clone(), token: entry.token }));
        }
        Ok(None)
    }

    async fn add(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<AddOutcome> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(AddOutcome::AlreadyPresent);
            }
        }
        let token = self.fresh_token();
        let expires_at = if ttl.is_zero() { None } else { Some(now + ttl) };
        entries.insert(key.to_string(), Entry { bytes, token, expires_at });
        Ok(AddOutcome::Inserted)
    }

    async fn incr(&self, key: &str, by: u64) -> Result<IncrOutcome> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(IncrOutcome::Absent);
        };
        if entry.is_expired(now) {
            entries.remove(key);
            return Ok(IncrOutcome::Absent);
        }
        let current: u64 = std::str::from_utf8(&entry.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + by;
        entry.bytes = next.to_string().into_bytes();
        entry.token = self.fresh_token();
        Ok(IncrOutcome::Value(next))
    }

    async fn cas(&self, key: &str, token: CasToken, bytes: Vec<u8>, ttl: Duration) -> Result<CasOutcome> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            None => Ok(CasOutcome::Absent),
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(CasOutcome::Absent)
            }
            Some(entry) if entry.token != token => Ok(CasOutcome::Conflict),
            Some(entry) => {
                entry.bytes = bytes;
                entry.token = self.fresh_token();
                entry.expires_at = if ttl.is_zero() { None } else { Some(now + ttl) };
                Ok(CasOutcome::Replaced)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_add_if_absent() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.add("k", b"a".to_vec(), Duration::ZERO).await.unwrap(),
            AddOutcome::Inserted
        );
        assert_eq!(
            store.add("k", b"b".to_vec(), Duration::ZERO).await.unwrap(),
            AddOutcome::AlreadyPresent
        );
        assert_eq!(store.get("k").await.unwrap().unwrap().bytes, b"a");
    }

    #[tokio::test]
    async fn incr_fails_on_absent_key() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("missing", 1).await.unwrap(), IncrOutcome::Absent);
    }

    #[tokio::test]
    async fn incr_gives_every_contender_a_distinct_value() {
        let store = InMemoryStore::new();
        store.add("counter", b"1".to_vec(), Duration::ZERO).await.unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            match store.incr("counter", 1).await.unwrap() {
                IncrOutcome::Value(v) => assert!(seen.insert(v), "duplicate reservation {v}"),
                IncrOutcome::Absent => panic!("counter should not vanish"),
            }
        }
    }

    #[tokio::test]
    async fn cas_detects_conflict_and_eviction() {
        let store = InMemoryStore::new();
        store.add("k", b"a".to_vec(), Duration::ZERO).await.unwrap();
        let rec = store.get("k").await.unwrap().unwrap();
        assert_eq!(
            store.cas("k", rec.token, b"b".to_vec(), Duration::ZERO).await.unwrap(),
            CasOutcome::Replaced
        );
        // stale token now conflicts
        assert_eq!(
            store.cas("k", rec.token, b"c".to_vec(), Duration::ZERO).await.unwrap(),
            CasOutcome::Conflict
        );
        store.evict("k").await;
        assert_eq!(
            store.cas("k", rec.token, b"d".to_vec(), Duration::ZERO).await.unwrap(),
            CasOutcome::Absent
        );
    }

    #[tokio::test]
    async fn cas_replace_clears_the_previous_ttl() {
        let store = InMemoryStore::new();
        store.add("k", b"a".to_vec(), Duration::from_millis(5)).await.unwrap();
        let rec = store.get("k").await.unwrap().unwrap();
        store.cas("k", rec.token, b"b".to_vec(), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap().unwrap().bytes, b"b");
    }

    #[tokio::test]
    async fn ttl_expiry_evicts_placeholder() {
        let store = InMemoryStore::new();
        store.add("k", b"a".to_vec(), Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }
}
