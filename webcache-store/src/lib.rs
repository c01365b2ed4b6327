#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
//! The cache client adapter (spec §4.A): a typed, async interface over an
//! evictable, non-transactional key/value store that offers only `get`,
//! add-if-absent, atomic numeric increment, and CAS-replace.
//!
//! Two backends ship: [`memory::InMemoryStore`], an always-available
//! in-process store used by tests and the bundled example server, and
//! (behind the `memcached` feature) [`memcached::MemcachedStore`], a real
//! memcached-protocol client for production deployment.

pub mod memory;

#[cfg(feature = "memcached")]
pub mod memcached;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from the store transport itself. Wrapped into
/// `webcache_types::CacheError::StoreUnavailable` by callers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or returned a transport error.
    #[error("store transport error: {0}")]
    Transport(String),
}

/// Result type for [`CacheStore`] operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// An opaque compare-and-swap token. The adapter preserves this across
/// encode/decode so a publisher can replace only the exact version of a
/// record it observed in a prior [`CacheStore::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasToken(pub u64);

/// A record as read from the store: its raw bytes plus the CAS token
/// needed to replace it.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    /// Opaque bytes; interpretation (metadata vs. content) is owned by
    /// `webcache_types::codec`.
    pub bytes: Vec<u8>,
    /// Token to pass back to [`CacheStore::cas`].
    pub token: CasToken,
}

/// Outcome of an add-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The key was absent and is now set to the given bytes.
    Inserted,
    /// The key was already present; no change was made.
    AlreadyPresent,
}

/// Outcome of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrOutcome {
    /// The new value after incrementing.
    Value(u64),
    /// The counter key did not exist (it was just evicted).
    Absent,
}

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was replaced.
    Replaced,
    /// A different writer replaced the record first; the token is stale.
    Conflict,
    /// The key was evicted entirely between the read and this write.
    Absent,
}

/// The four primitives spec §4.A requires of the shared store.
///
/// Implementations must linearize `add`, `incr`, and `cas` per key — that
/// is the only ordering guarantee the reservation protocol in
/// `webcache-core` relies on (spec §5). No cross-key ordering is assumed.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Read a record, if present.
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>>;

    /// Atomically insert `bytes` at `key` if nothing is there, with the
    /// given time-to-live.
    async fn add(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<AddOutcome>;

    /// Atomically increment the numeric counter stored at `key` (a
    /// sibling key of the record it counts for, per spec §9's redesign
    /// note) by `by`, returning the new value.
    async fn incr(&self, key: &str, by: u64) -> Result<IncrOutcome>;

    /// Atomically replace the record at `key` with `bytes`, but only if
    /// it is still exactly the version identified by `token`. `ttl` is
    /// applied to the replacement the same way it is on `add` (zero means
    /// no expiry) — a replace does not inherit whatever TTL the old
    /// version of the record happened to carry.
    async fn cas(&self, key: &str, token: CasToken, bytes: Vec<u8>, ttl: Duration) -> Result<CasOutcome>;
}
