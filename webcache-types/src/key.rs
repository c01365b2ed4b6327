//! Deterministic derivation of store keys from `(url, session, reservation)`.
//!
//! Keys are hashed rather than embedding the URL directly so that they fit
//! the shared store's length budget (memcached caps keys at 250 bytes); the
//! prefix keeps metadata and content records in disjoint keyspaces so that
//! eviction of one family can never be mistaken for the other.

use sha2::{Digest, Sha256};

/// Key of the metadata record `M(url)`.
pub fn metadata_key(url: &str) -> String {
    format!("M:{}", hex::encode(Sha256::digest(url.as_bytes())))
}

/// Key of the content record `C(url, session, reservation)`.
///
/// The `|` separator between fields prevents prefix collisions between,
/// e.g., `session=12` `reservation=3` and `session=1` `reservation=23`.
pub fn content_key(url: &str, session: &str, reservation: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(session.as_bytes());
    hasher.update(b"|");
    hasher.update(reservation.to_string().as_bytes());
    format!("C:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_key_is_stable_and_prefixed() {
        let a = metadata_key("http://example.test/x");
        let b = metadata_key("http://example.test/x");
        assert_eq!(a, b);
        assert!(a.starts_with("M:"));
    }

    #[test]
    fn content_key_separator_prevents_collisions() {
        // ("session=12", reservation=3) vs ("session=1", reservation=23)
        // must not collide even though the concatenation without a
        // separator would be identical ("123").
        let a = content_key("http://example.test/x", "12", 3);
        let b = content_key("http://example.test/x", "1", 23);
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_urls_produce_distinct_metadata_keys() {
        assert_ne!(metadata_key("http://a.test/x"), metadata_key("http://b.test/x"));
    }
}
