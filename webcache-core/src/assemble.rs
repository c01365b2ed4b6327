//! The response assembler (spec §4.G): turns a metadata/content pair, or
//! a conditional match, into the bytes and headers actually sent to the
//! client.

use std::collections::HashMap;

use httpdate::fmt_http_date;
use webcache_types::{ContentRecord, MetadataRecord, Timestamp};

/// Response headers the intermediary re-emits from a cached body. Every
/// other origin header — `Set-Cookie`, `Pragma`, `Expires` in particular —
/// is dropped, since the intermediary now owns freshness signaling.
const FORWARDABLE_RESPONSE_HEADERS: &[&str] = &["content-type", "content-encoding"];

/// Debug header spec §4.G calls for, naming which code path served the
/// response. Not part of the cache contract; safe to ignore.
pub const STATUS_HEADER: &str = "x-webcache-status";

/// Values for [`STATUS_HEADER`].
pub mod status {
    /// Served a cached body, no conditional request was made.
    pub const HIT: &str = "HIT";
    /// Served `304 Not Modified` against a cached body.
    pub const HIT_304: &str = "HIT-304";
    /// This worker fetched from origin and published before serving.
    pub const MISS_FETCH: &str = "MISS-FETCH";
    /// Origin was reached but the body could not be cached.
    pub const MISS_UNCACHED: &str = "MISS-UNCACHED";
}

/// A fully assembled response: status line, headers (insertion order
/// preserved for test friendliness), and body.
#[derive(Debug, Clone)]
pub struct AssembledResponse {
    /// HTTP status code to send.
    pub status: u16,
    /// Headers to send, already filtered and augmented.
    pub headers: Vec<(String, String)>,
    /// Body octets. Empty for `304 Not Modified`.
    pub body: Vec<u8>,
}

fn common_headers(last_modified: Timestamp, max_age_secs: u64, extra: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut headers = vec![
        ("last-modified".to_string(), fmt_http_date(last_modified.into())),
        ("cache-control".to_string(), format!("public, max-age={max_age_secs}")),
    ];
    for name in FORWARDABLE_RESPONSE_HEADERS {
        if let Some(value) = extra.get(*name) {
            headers.push((name.to_string(), value.clone()));
        }
    }
    headers
}

/// Assemble a full `200` (or the origin's own status) response from a
/// cached body.
pub fn assemble_hit(
    meta: &MetadataRecord,
    content: &ContentRecord,
    max_age_secs: u64,
    debug_status: &str,
) -> AssembledResponse {
    let last_modified = meta.last_modified.unwrap_or(meta.session);
    let mut headers = common_headers(last_modified, max_age_secs, &content.headers);
    headers.push(("content-length".to_string(), content.body.len().to_string()));
    headers.push((STATUS_HEADER.to_string(), debug_status.to_string()));
    AssembledResponse { status: content.status, headers, body: content.body.clone() }
}

/// Assemble a `304 Not Modified` response. Body is empty; per spec §4.F
/// this path never needed to read the content record at all.
pub fn assemble_not_modified(meta: &MetadataRecord, max_age_secs: u64) -> AssembledResponse {
    let last_modified = meta.last_modified.unwrap_or(meta.session);
    let mut headers = common_headers(last_modified, max_age_secs, &HashMap::new());
    headers.push((STATUS_HEADER.to_string(), status::HIT_304.to_string()));
    AssembledResponse { status: 304, headers, body: Vec::new() }
}

/// Assemble a response for a body that was fetched from origin but could
/// not be published to the shared store (degraded serve, spec §4.E step 5).
pub fn assemble_uncached(
    status_code: u16,
    headers_in: &HashMap<String, String>,
    body: Vec<u8>,
) -> AssembledResponse {
    let mut headers: Vec<(String, String)> = FORWARDABLE_RESPONSE_HEADERS
        .iter()
        .filter_map(|name| headers_in.get(*name).map(|v| (name.to_string(), v.clone())))
        .collect();
    headers.push(("content-length".to_string(), body.len().to_string()));
    headers.push((STATUS_HEADER.to_string(), status::MISS_UNCACHED.to_string()));
    AssembledResponse { status: status_code, headers, body }
}
