//! The origin fetcher (spec §4.D): issue a loopback GET, collect the
//! response, and digest the body as it arrives.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::Config;

/// Request headers that are safe to forward to the origin. Everything
/// else — in particular `Cookie`, and any `Host` override that would
/// re-enter the intermediary — is dropped.
const FORWARDABLE_REQUEST_HEADERS: &[&str] =
    &["accept", "accept-encoding", "accept-language", "user-agent"];

/// Errors from a single origin fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The origin could not be connected to at all.
    #[error("origin unreachable: {0}")]
    Unreachable(String),
    /// The origin's response could not be parsed as valid HTTP.
    #[error("origin protocol error: {0}")]
    Protocol(String),
    /// The origin's body exceeded the configured maximum.
    #[error("origin response exceeded {limit} bytes")]
    TooLarge {
        /// The configured maximum.
        limit: usize,
    },
}

/// The result of a successful origin fetch.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Origin HTTP status code.
    pub status: u16,
    /// Response headers, as strings (single-valued; repeated headers are
    /// collapsed to their last occurrence, which is sufficient for the
    /// allow-listed set §4.G re-emits).
    pub headers: HashMap<String, String>,
    /// Raw response body.
    pub body: Vec<u8>,
    /// SHA-256 digest of `body`.
    pub digest: [u8; 32],
}

/// Issues loopback GET requests against the origin application.
#[derive(Debug, Clone)]
pub struct OriginFetcher {
    client: reqwest::Client,
}

impl Default for OriginFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginFetcher {
    /// Build a fetcher with a short connect timeout; the origin is always
    /// loopback, so a slow connect means something is badly wrong.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client builds with static config");
        OriginFetcher { client }
    }

    /// Fetch `path_and_query` from the origin, forwarding `client_for`
    /// (the original client's address) as `X-Forwarded-For` and the
    /// whitelisted subset of `request_headers`.
    pub async fn fetch(
        &self,
        config: &Config,
        path_and_query: &str,
        request_headers: &HashMap<String, String>,
        client_for: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let url = format!("http://127.0.0.1:{}{}", config.origin_port, path_and_query);
        let mut builder = self.client.get(&url).header("X-Forwarded-For", client_for);
        for name in FORWARDABLE_REQUEST_HEADERS {
            if let Some(value) = request_headers.get(*name) {
                builder = builder.header(*name, value);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        let limit = config.max_body_bytes;
        let mut hasher = Sha256::new();
        let mut body = Vec::new();
        let mut stream = response;
        loop {
            let chunk = stream
                .chunk()
                .await
                .map_err(|e| FetchError::Protocol(e.to_string()))?;
            let Some(chunk) = chunk else { break };
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            hasher.update(&chunk);
            body.extend_from_slice(&chunk);
        }

        let digest: [u8; 32] = hasher.finalize().into();
        Ok(FetchedResponse { status, headers, body, digest })
    }
}
