//! The revalidation & freshness engine (spec §4.F). These are pure
//! decision functions; the request handler owns the store reads they are
//! consulted around, so that a conditional 304 never has to read the
//! content record.

use std::time::SystemTime;

use webcache_types::{MetadataRecord, Timestamp};

/// `If-Modified-Since >= M.last_modified`, compared at second resolution
/// per spec §4.F (HTTP-date comparison, inclusive).
pub fn is_conditional_match(meta: &MetadataRecord, if_modified_since: Option<SystemTime>) -> bool {
    let (Some(candidate), Some(last_modified)) = (if_modified_since, meta.last_modified) else {
        return false;
    };
    let candidate: Timestamp = candidate.into();
    candidate.to_seconds() >= last_modified.to_seconds()
}
