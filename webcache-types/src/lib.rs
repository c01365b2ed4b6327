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
//! Shared data model for `webcache`: the metadata/content record types of
//! spec §3, the key scheme of §4.B, the versioned codec of §4.C, and the
//! [`CacheError`] kind shared by every other crate in the workspace.

mod codec;
mod error;
mod key;
mod record;

pub use codec::{decode_content, decode_metadata, encode_content, encode_metadata};
pub use error::{CacheError, Result};
pub use key::{content_key, metadata_key};
pub use record::{ContentRecord, MetadataRecord, Timestamp};
