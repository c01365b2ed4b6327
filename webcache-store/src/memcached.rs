//! A [`CacheStore`] backed by a real memcached server, using the
//! [`async-memcached`](https://docs.rs/async-memcached) client — the
//! protocol spec §6 describes ("a memcached-style key/value protocol")
//! under the hood.
//!
//! A single connection is held behind a mutex. Memcached's wire protocol
//! is request/response per connection, so this serializes store
//! operations the same way a single TCP connection to memcached would;
//! production deployments wanting more throughput should run one
//! `MemcachedStore` per worker or grow this into a small connection pool.

use std::time::Duration;

use async_memcached::{Client, Error as MemcachedError, Status};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{AddOutcome, CacheStore, CasOutcome, CasToken, IncrOutcome, Result, StoreError};

/// A memcached-backed [`CacheStore`].
pub struct MemcachedStore {
    client: Mutex<Client>,
}

impl std::fmt::Debug for MemcachedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedStore").finish_non_exhaustive()
    }
}

impl MemcachedStore {
    /// Connect to a memcached server at `host:port`.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let dsn = format!("tcp://{endpoint}");
        let client = Client::new(dsn).await.map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(MemcachedStore { client: Mutex::new(client) })
    }
}

#[async_trait]
impl CacheStore for MemcachedStore {
    async fn get(&self, key: &str) -> Result<Option<crate::StoredRecord>> {
        let mut client = self.client.lock().await;
        let values = client.get(key).await.map_err(|e| StoreError::Transport(e.to_string()))?;
        let Some(value) = values else {
            return Ok(None);
        };
        let cas = value.cas.ok_or_else(|| {
            StoreError::Transport("memcached server did not return a cas identifier".into())
        })?;
        Ok(Some(crate::StoredRecord { bytes: value.data, token: CasToken(cas) }))
    }

    async fn add(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<AddOutcome> {
        let mut client = self.client.lock().await;
        let ttl_secs = ttl.as_secs() as i64;
        match client.add(key, bytes.as_slice(), Some(ttl_secs), None).await {
            Ok(()) => Ok(AddOutcome::Inserted),
            Err(MemcachedError::Protocol(Status::NotStored))
            | Err(MemcachedError::Protocol(Status::Exists)) => Ok(AddOutcome::AlreadyPresent),
            Err(e) => Err(StoreError::Transport(e.to_string())),
        }
    }

    async fn incr(&self, key: &str, by: u64) -> Result<IncrOutcome> {
        let mut client = self.client.lock().await;
        match client.increment(key, by).await {
            Ok(value) => Ok(IncrOutcome::Value(value)),
            Err(MemcachedError::Protocol(Status::NotFound)) => Ok(IncrOutcome::Absent),
            Err(e) => Err(StoreError::Transport(e.to_string())),
        }
    }

    async fn cas(&self, key: &str, token: CasToken, bytes: Vec<u8>, ttl: Duration) -> Result<CasOutcome> {
        let mut client = self.client.lock().await;
        let ttl_secs = ttl.as_secs() as i64;
        match client.cas(key, bytes, Some(ttl_secs), None, token.0).await {
            Ok(()) => Ok(CasOutcome::Replaced),
            Err(MemcachedError::Protocol(Status::Exists)) => Ok(CasOutcome::Conflict),
            Err(MemcachedError::Protocol(Status::NotFound)) => Ok(CasOutcome::Absent),
            Err(e) => Err(StoreError::Transport(e.to_string())),
        }
    }
}
