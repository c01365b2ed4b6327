//! The two record families that live in the shared store: `M(url)`
//! metadata and `C(url, session, reservation)` content. See spec §3 for
//! the full invariant list (I1–I5); [`MetadataRecord::check_invariants`]
//! enforces the ones that are checkable from the record alone.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A UTC instant with sub-second resolution, serializable independently
/// of the host's `SystemTime` representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    secs: u64,
    nanos: u32,
}

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    /// Truncate to second resolution, the precision `Last-Modified` and
    /// `If-Modified-Since` are compared at.
    pub fn to_seconds(self) -> Self {
        Timestamp { secs: self.secs, nanos: 0 }
    }

    /// Seconds since the Unix epoch.
    pub fn unix_seconds(self) -> u64 {
        self.secs
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Timestamp { secs: d.as_secs(), nanos: d.subsec_nanos() }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(t: Timestamp) -> Self {
        UNIX_EPOCH + Duration::new(t.secs, t.nanos)
    }
}

/// Metadata record `M(url)`. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Canonical request URL.
    pub url: String,
    /// Monotonic creation timestamp of this metadata lineage.
    pub session: Timestamp,
    /// Contention counter, starts at 1 and only ever increases.
    pub reservation: u64,
    /// Reservation value of the last worker that successfully published.
    pub last_noted: u64,
    /// False for a freshly created placeholder.
    pub valid: bool,
    /// When the bound content was retrieved from origin. Absent until `valid`.
    pub fetched: Option<Timestamp>,
    /// UTC time advertised via `Last-Modified`. Updated only when the
    /// body digest changes.
    pub last_modified: Option<Timestamp>,
    /// Key of the currently bound content record. Absent until `valid`.
    pub content_key: Option<String>,
    /// SHA-256 digest of the current body.
    pub digest: Option<[u8; 32]>,
}

impl MetadataRecord {
    /// A freshly created placeholder for a cold URL.
    pub fn placeholder(url: String, session: Timestamp) -> Self {
        MetadataRecord {
            url,
            session,
            reservation: 1,
            last_noted: 0,
            valid: false,
            fetched: None,
            last_modified: None,
            content_key: None,
            digest: None,
        }
    }

    /// Checks the invariants this record can be validated against in
    /// isolation (I1: `reservation >= last_noted >= 0` and
    /// `valid => last_noted >= 1`; I2/I4 require the bound content record
    /// and are checked by the caller that holds both).
    pub fn check_invariants(&self) -> Result<(), CacheError> {
        if self.reservation < self.last_noted {
            return Err(CacheError::CorruptMetadata(format!(
                "reservation {} < last_noted {}",
                self.reservation, self.last_noted
            )));
        }
        if self.valid && self.last_noted < 1 {
            return Err(CacheError::CorruptMetadata(
                "valid record has last_noted < 1".into(),
            ));
        }
        if self.valid && self.content_key.is_none() {
            return Err(CacheError::CorruptMetadata(
                "valid record missing content_key".into(),
            ));
        }
        Ok(())
    }

    /// Whether the bound content should live at
    /// `key(url, session, last_noted)` per invariant I2.
    pub fn expected_content_key(&self) -> Option<String> {
        if self.valid {
            Some(crate::key::content_key(
                &self.url,
                &self.session.unix_seconds().to_string(),
                self.last_noted,
            ))
        } else {
            None
        }
    }
}

/// Content record `C(url, session, reservation)`. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Echoed from the metadata that points here.
    pub url: String,
    /// Echoed from the metadata that points here.
    pub session: Timestamp,
    /// Echoed from the metadata that points here.
    pub reservation: u64,
    /// Origin HTTP status line.
    pub status: u16,
    /// Header set the intermediary will re-emit, already filtered.
    pub headers: HashMap<String, String>,
    /// Raw response body octets.
    pub body: Vec<u8>,
}

impl ContentRecord {
    /// Invariant I5: a content record whose echoed `(url, session,
    /// reservation)` does not match the metadata that led to it must be
    /// treated as absent.
    pub fn matches(&self, url: &str, session: Timestamp, reservation: u64) -> bool {
        self.url == url && self.session == session && self.reservation == reservation
    }
}
