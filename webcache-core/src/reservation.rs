//! The reservation protocol (spec §4.E): elect at most one fetcher per
//! `(url, generation)`, give every other concurrent worker a bounded
//! backoff, and tolerate arbitrary eviction of either record family.

use std::time::Duration;

use log::{debug, warn};
use webcache_store::{AddOutcome, CacheStore, CasOutcome, IncrOutcome};
use webcache_types::{
    content_key, decode_content, decode_metadata, encode_content, encode_metadata, metadata_key,
    CacheError, ContentRecord, MetadataRecord, Timestamp,
};

use crate::config::Config;
use crate::fetch::{FetchError, FetchedResponse, OriginFetcher};

/// A fetcher retries a lost CAS race this many times before degrading to
/// an uncached serve, per spec §4.E step 5.
const MAX_PUBLICATION_RETRIES: u32 = 3;

fn reservation_counter_key(meta_key: &str) -> String {
    format!("{meta_key}:reservation")
}

/// The state of a metadata record as observed by a worker (spec §4.E).
enum MetadataState {
    Absent,
    Placeholder(MetadataRecord),
    PublishedFresh(MetadataRecord),
    PublishedStale(MetadataRecord),
}

fn classify(meta: Option<MetadataRecord>, now: Timestamp, freshness_window: Duration) -> MetadataState {
    match meta {
        None => MetadataState::Absent,
        Some(m) if !m.valid => MetadataState::Placeholder(m),
        Some(m) => {
            let fetched = m.fetched.unwrap_or(m.session);
            let age = now.unix_seconds().saturating_sub(fetched.unix_seconds());
            if age <= freshness_window.as_secs() {
                MetadataState::PublishedFresh(m)
            } else {
                MetadataState::PublishedStale(m)
            }
        }
    }
}

async fn read_metadata(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<MetadataRecord>, CacheError> {
    let Some(stored) = store
        .get(key)
        .await
        .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?
    else {
        return Ok(None);
    };
    match decode_metadata(&stored.bytes) {
        Ok(m) => Ok(Some(m)),
        Err(e) => {
            warn!("corrupt metadata at {key}: {e}; treating as absent");
            Ok(None)
        }
    }
}

/// One iteration of `LOOKUP`: reads `M(url)`, classifies it, and either
/// hands back a record the handler can serve, or elects/parks the
/// calling worker.
pub enum Step {
    /// `Published-fresh`: the handler decides HIT vs. conditional HIT
    /// vs. (if the bound content has vanished) re-entering the protocol.
    Fresh(MetadataRecord),
    /// This worker won the election and must fetch from origin.
    Elected { meta: MetadataRecord, reservation: u64 },
    /// This worker lost the election and must sleep before rechecking
    /// with the same `reservation` it was already assigned — a waiter
    /// never re-contends for a new one on wakeup.
    Wait { reservation: u64, delay: Duration },
    /// The record vanished mid-evaluation or was corrupt; loop again.
    Restart,
}

/// Run one `LOOKUP` iteration for `url`. `pending` is `None` on a
/// worker's first pass (it has not contended for a reservation yet) and
/// `Some(r)` on every subsequent wakeup, carrying the reservation it was
/// assigned the first time it lost the election — rechecking against the
/// latest `last_noted` without minting a new one.
pub async fn step(
    store: &dyn CacheStore,
    url: &str,
    config: &Config,
    pending: Option<u64>,
) -> Result<Step, CacheError> {
    let key = metadata_key(url);
    let meta = read_metadata(store, &key).await?;
    match classify(meta, Timestamp::now(), config.freshness_window) {
        MetadataState::Absent => elect_as_new_lineage(store, url, &key, config).await,
        MetadataState::Placeholder(m) | MetadataState::PublishedStale(m) => match pending {
            Some(r) => Ok(reconsider_wait(m, r, config)),
            None => elect_or_wait(store, &key, m, config).await,
        },
        MetadataState::PublishedFresh(m) => Ok(Step::Fresh(m)),
    }
}

/// Re-run the election for a metadata record whose bound content has
/// vanished even though it was still inside the freshness window — spec
/// §4.F: "Bound content present? ... If absent ... treat as expired
/// regardless of timestamp." Takes the same `pending` carry as [`step`].
pub async fn elect_after_missing_content(
    store: &dyn CacheStore,
    meta: MetadataRecord,
    config: &Config,
    pending: Option<u64>,
) -> Result<Step, CacheError> {
    match pending {
        Some(r) => Ok(reconsider_wait(meta, r, config)),
        None => {
            let key = metadata_key(&meta.url);
            elect_or_wait(store, &key, meta, config).await
        }
    }
}

/// Recheck a previously-assigned reservation against the metadata's
/// current `last_noted`, without incrementing the shared counter again.
fn reconsider_wait(meta: MetadataRecord, reservation: u64, config: &Config) -> Step {
    let n = meta.last_noted;
    if reservation == n + 1 {
        debug!("worker for {} now elected on recheck, reservation={reservation}", meta.url);
        Step::Elected { meta, reservation }
    } else if reservation <= n {
        debug!("reservation {reservation} for {} was superseded; restarting", meta.url);
        Step::Restart
    } else {
        let backoff = config.backoff_for(reservation, n);
        debug!("worker for {} still waits {backoff:?} (r={reservation}, last_noted={n})", meta.url);
        Step::Wait { reservation, delay: backoff }
    }
}

async fn elect_as_new_lineage(
    store: &dyn CacheStore,
    url: &str,
    key: &str,
    config: &Config,
) -> Result<Step, CacheError> {
    let placeholder = MetadataRecord::placeholder(url.to_string(), Timestamp::now());
    let ttl = config.placeholder_ttl();
    let outcome = store
        .add(key, encode_metadata(&placeholder), ttl)
        .await
        .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
    match outcome {
        AddOutcome::Inserted => {
            // Seed the sibling reservation counter. A worker that reads
            // the placeholder before this completes will see the counter
            // key as absent and restart — a narrow, documented race (see
            // DESIGN.md) rather than a correctness violation, since it
            // only ever causes a spurious retry, never a double fetch.
            let counter_key = reservation_counter_key(key);
            store
                .add(&counter_key, b"1".to_vec(), ttl)
                .await
                .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
            debug!("elected {url} as new lineage, reservation=1");
            Ok(Step::Elected { meta: placeholder, reservation: 1 })
        }
        AddOutcome::AlreadyPresent => Ok(Step::Restart),
    }
}

async fn elect_or_wait(
    store: &dyn CacheStore,
    key: &str,
    meta: MetadataRecord,
    config: &Config,
) -> Result<Step, CacheError> {
    let counter_key = reservation_counter_key(key);
    let incr = store
        .incr(&counter_key, 1)
        .await
        .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
    match incr {
        IncrOutcome::Absent => Ok(Step::Restart),
        IncrOutcome::Value(r) => {
            let n = meta.last_noted;
            if r == n + 1 {
                debug!("elected {} as fetcher, reservation={r}", meta.url);
                Ok(Step::Elected { meta, reservation: r })
            } else {
                let backoff = config.backoff_for(r, n);
                debug!("worker for {} waits {backoff:?} (r={r}, last_noted={n})", meta.url);
                Ok(Step::Wait { reservation: r, delay: backoff })
            }
        }
    }
}

/// The outcome of the elected fetcher's publication attempt (spec
/// §4.E "Publication algorithm").
pub enum PublishOutcome {
    /// Content was fetched and the new metadata installed; serve it.
    Published(MetadataRecord, ContentRecord),
    /// The origin could not be reached or misbehaved; the caller gets a
    /// 502-class response. The reservation stays incremented; the next
    /// request re-elects.
    OriginError(FetchError),
    /// The fetch succeeded but publication could not be completed
    /// (corruption or exhausted CAS retries); serve the fetched body
    /// directly without caching it.
    DegradedServe(FetchedResponse),
}

/// Runs the elected fetcher's full publish sequence: origin fetch,
/// content-record write, and metadata CAS (or fresh-lineage fallback if
/// the metadata vanished mid-publication).
pub async fn fetch_and_publish(
    store: &dyn CacheStore,
    fetcher: &OriginFetcher,
    config: &Config,
    url: &str,
    path_and_query: &str,
    request_headers: &std::collections::HashMap<String, String>,
    client_for: &str,
    elected: MetadataRecord,
    reservation: u64,
) -> Result<PublishOutcome, CacheError> {
    let fetched = match fetcher.fetch(config, path_and_query, request_headers, client_for).await {
        Ok(f) => f,
        Err(e) => {
            warn!("origin fetch failed for {url}: {e}");
            return Ok(PublishOutcome::OriginError(e));
        }
    };

    let last_modified = match (elected.valid, elected.digest, elected.last_modified) {
        (true, Some(old_digest), Some(old_last_modified)) if old_digest == fetched.digest => {
            old_last_modified
        }
        _ => Timestamp::now().to_seconds(),
    };

    let session_field = elected.session.unix_seconds().to_string();
    let content_key_str = content_key(url, &session_field, reservation);
    let content = ContentRecord {
        url: url.to_string(),
        session: elected.session,
        reservation,
        status: fetched.status,
        headers: fetched.headers.clone(),
        body: fetched.body.clone(),
    };

    let content_add = store
        .add(&content_key_str, encode_content(&content), Duration::ZERO)
        .await
        .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
    if let AddOutcome::AlreadyPresent = content_add {
        let matches = store
            .get(&content_key_str)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?
            .and_then(|rec| decode_content(&rec.bytes).ok())
            .map(|existing| existing.matches(url, elected.session, reservation))
            .unwrap_or(false);
        if !matches {
            warn!("content echo mismatch publishing {url}; degrading to uncached serve");
            return Ok(PublishOutcome::DegradedServe(fetched));
        }
    }

    let new_meta = MetadataRecord {
        url: url.to_string(),
        session: elected.session,
        reservation,
        last_noted: reservation,
        valid: true,
        fetched: Some(Timestamp::now()),
        last_modified: Some(last_modified),
        content_key: Some(content_key_str),
        digest: Some(fetched.digest),
    };

    let meta_key_str = metadata_key(url);
    for attempt in 0..MAX_PUBLICATION_RETRIES {
        let current = store
            .get(&meta_key_str)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        let Some(current) = current else {
            return Ok(install_fresh_lineage(store, url, &fetched, last_modified).await?);
        };
        let new_bytes = encode_metadata(&new_meta);
        // The record being replaced may still be carrying the short
        // placeholder TTL; a published record lives until the freshness
        // window, not the placeholder's, so the replace clears it.
        match store
            .cas(&meta_key_str, current.token, new_bytes, Duration::ZERO)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?
        {
            CasOutcome::Replaced => return Ok(PublishOutcome::Published(new_meta, content)),
            CasOutcome::Conflict => {
                debug!("publication conflict for {url}, attempt {attempt}");
                continue;
            }
            CasOutcome::Absent => {
                return Ok(install_fresh_lineage(store, url, &fetched, last_modified).await?);
            }
        }
    }
    warn!("exhausted publication retries for {url}; serving uncached");
    Ok(PublishOutcome::DegradedServe(fetched))
}

/// Step 6 of the publication algorithm: metadata vanished mid-publish, so
/// start a brand new lineage rather than lose the fetched body.
async fn install_fresh_lineage(
    store: &dyn CacheStore,
    url: &str,
    fetched: &FetchedResponse,
    last_modified: Timestamp,
) -> Result<PublishOutcome, CacheError> {
    let fresh_session = Timestamp::now();
    let content_key_str = content_key(url, &fresh_session.unix_seconds().to_string(), 1);
    let content = ContentRecord {
        url: url.to_string(),
        session: fresh_session,
        reservation: 1,
        status: fetched.status,
        headers: fetched.headers.clone(),
        body: fetched.body.clone(),
    };
    store
        .add(&content_key_str, encode_content(&content), Duration::ZERO)
        .await
        .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
    let meta = MetadataRecord {
        url: url.to_string(),
        session: fresh_session,
        reservation: 1,
        last_noted: 1,
        valid: true,
        fetched: Some(Timestamp::now()),
        last_modified: Some(last_modified),
        content_key: Some(content_key_str),
        digest: Some(fetched.digest),
    };
    store
        .add(&metadata_key(url), encode_metadata(&meta), Duration::ZERO)
        .await
        .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
    Ok(PublishOutcome::Published(meta, content))
}

/// Load the content record bound to `meta`, honoring invariant I5: a
/// mismatched echo is treated as absent, same as an evicted key.
pub async fn load_bound_content(
    store: &dyn CacheStore,
    meta: &MetadataRecord,
) -> Result<Option<ContentRecord>, CacheError> {
    let Some(content_key_str) = &meta.content_key else {
        return Ok(None);
    };
    let Some(stored) = store
        .get(content_key_str)
        .await
        .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?
    else {
        return Ok(None);
    };
    let content = match decode_content(&stored.bytes) {
        Ok(c) => c,
        Err(e) => {
            warn!("corrupt content at {content_key_str}: {e}");
            return Ok(None);
        }
    };
    if content.matches(&meta.url, meta.session, meta.last_noted) {
        Ok(Some(content))
    } else {
        Ok(None)
    }
}
