//! Encoding for records written to the shared store.
//!
//! Every record is a one-byte version tag followed by a `bincode`-encoded
//! body, the same versioned-envelope shape the teacher crate uses for its
//! own cache managers. The codec is total in the encode direction; decode
//! is partial and turns any failure — unknown version, truncated bytes,
//! missing field — into [`CacheError::CorruptMetadata`] /
//! [`CacheError::CorruptContent`], which callers treat as "absent".

use crate::error::CacheError;
use crate::record::{ContentRecord, MetadataRecord};

const METADATA_VERSION_V1: u8 = 1;
const CONTENT_VERSION_V1: u8 = 1;

/// Encode a metadata record for storage.
pub fn encode_metadata(record: &MetadataRecord) -> Vec<u8> {
    let mut out = vec![METADATA_VERSION_V1];
    bincode::serialize_into(&mut out, record)
        .expect("metadata record is always serializable");
    out
}

/// Decode a metadata record previously written by [`encode_metadata`].
pub fn decode_metadata(bytes: &[u8]) -> Result<MetadataRecord, CacheError> {
    let (version, body) = bytes.split_first().ok_or_else(|| {
        CacheError::CorruptMetadata("empty record".into())
    })?;
    match *version {
        METADATA_VERSION_V1 => bincode::deserialize(body)
            .map_err(|e| CacheError::CorruptMetadata(e.to_string())),
        other => Err(CacheError::CorruptMetadata(format!(
            "unknown metadata version {other}"
        ))),
    }
}

/// Encode a content record for storage.
pub fn encode_content(record: &ContentRecord) -> Vec<u8> {
    let mut out = vec![CONTENT_VERSION_V1];
    bincode::serialize_into(&mut out, record)
        .expect("content record is always serializable");
    out
}

/// Decode a content record previously written by [`encode_content`].
pub fn decode_content(bytes: &[u8]) -> Result<ContentRecord, CacheError> {
    let (version, body) = bytes.split_first().ok_or_else(|| {
        CacheError::CorruptContent("empty record".into())
    })?;
    match *version {
        CONTENT_VERSION_V1 => bincode::deserialize(body)
            .map_err(|e| CacheError::CorruptContent(e.to_string())),
        other => Err(CacheError::CorruptContent(format!(
            "unknown content version {other}"
        ))),
    }
}
