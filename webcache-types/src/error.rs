use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised by the cache client adapter, the metadata/content codec,
/// and the origin fetcher. The reservation protocol and request handler in
/// `webcache-core` layer their own state-machine errors on top of this.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// The shared store could not be reached (connection refused, timed
    /// out, or returned a transport-level error). Callers should fail
    /// open: bypass the cache and proxy straight to the origin.
    #[error("cache store unavailable: {0}")]
    #[diagnostic(code(webcache::store_unavailable))]
    StoreUnavailable(String),

    /// A metadata record's bytes did not decode: unknown version tag,
    /// missing required field, or truncated payload. Treated as "absent"
    /// by the request handler.
    #[error("corrupt metadata record: {0}")]
    #[diagnostic(code(webcache::corrupt_metadata))]
    CorruptMetadata(String),

    /// A content record's bytes did not decode, or its echoed
    /// `(url, session, reservation)` did not match the metadata that
    /// pointed to it (invariant I5).
    #[error("corrupt content record: {0}")]
    #[diagnostic(code(webcache::corrupt_content))]
    CorruptContent(String),

    /// The origin could not be connected to at all.
    #[error("origin unreachable: {0}")]
    #[diagnostic(code(webcache::origin_unreachable))]
    OriginUnreachable(String),

    /// The origin responded but the response could not be parsed as
    /// valid HTTP.
    #[error("origin protocol error: {0}")]
    #[diagnostic(code(webcache::origin_protocol_error))]
    OriginProtocolError(String),

    /// The origin's response body exceeded `max_body_bytes`.
    #[error("origin response exceeded {limit} bytes")]
    #[diagnostic(code(webcache::origin_too_large))]
    OriginTooLarge {
        /// The configured maximum.
        limit: usize,
    },

    /// A fetcher's `cas` publication lost a race against another writer
    /// after exhausting its retry budget.
    #[error("publication conflict: exhausted retries for {key}")]
    #[diagnostic(code(webcache::publication_conflict))]
    PublicationConflict {
        /// The metadata key that could not be published.
        key: String,
    },

    /// The request originated from the intermediary's own loopback
    /// address, which would otherwise re-enter the origin fetcher in a
    /// loop.
    #[error("loop detected: request originated from 127.0.0.1")]
    #[diagnostic(code(webcache::loop_detected))]
    LoopDetected,

    /// Error constructing or inspecting an `http` type.
    #[error(transparent)]
    #[diagnostic(code(webcache::http))]
    Http(#[from] http::Error),

    /// Error converting a header value to a string.
    #[error(transparent)]
    #[diagnostic(code(webcache::header_to_str))]
    HeaderToStr(#[from] http::header::ToStrError),

    /// Error parsing a header value.
    #[error(transparent)]
    #[diagnostic(code(webcache::invalid_header_value))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Error parsing a header name.
    #[error(transparent)]
    #[diagnostic(code(webcache::invalid_header_name))]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
}
