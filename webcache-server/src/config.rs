//! Environment-driven configuration (spec §6). Every tunable has a
//! sensible default from [`webcache_core::Config`]; the environment only
//! overrides what an operator sets explicitly.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use webcache_core::Config as CoreConfig;

/// Backend selection for the shared store.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// The bundled in-process store. Useful for a single-instance deployment
    /// or local development; gives up the "shared across processes" half of
    /// the spec's contract.
    Memory,
    /// A memcached endpoint, `host:port`.
    Memcached(String),
}

/// Errors parsing an environment variable into a config value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The variable was present but not valid for its target type.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Name of the offending environment variable.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}

/// Full server configuration: the reservation/freshness tunables plus the
/// transport-level settings the library crate doesn't own.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: SocketAddr,
    /// Which [`CacheStore`](webcache_store::CacheStore) backend to build.
    pub store: StoreBackend,
    /// Tunables handed to [`webcache_core::CacheHandler`].
    pub core: CoreConfig,
}

fn parse_env<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

impl ServerConfig {
    /// Build configuration from the process environment, falling back to
    /// the library defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = CoreConfig::default();

        let listen_addr: SocketAddr =
            parse_env("WEBCACHE_LISTEN_ADDR", "127.0.0.1:9080".parse().unwrap())?;
        let origin_port = parse_env("WEBCACHE_ORIGIN_PORT", defaults.origin_port)?;
        let freshness_window = Duration::from_secs(parse_env(
            "WEBCACHE_FRESHNESS_WINDOW_SECONDS",
            defaults.freshness_window.as_secs(),
        )?);
        let backoff_base = Duration::from_millis(parse_env(
            "WEBCACHE_BACKOFF_BASE_MS",
            defaults.backoff_base.as_millis() as u64,
        )?);
        let backoff_cap = Duration::from_millis(parse_env(
            "WEBCACHE_BACKOFF_CAP_MS",
            defaults.backoff_cap.as_millis() as u64,
        )?);
        let max_body_bytes = parse_env("WEBCACHE_MAX_BODY_BYTES", defaults.max_body_bytes)?;
        let max_lookup_iterations =
            parse_env("WEBCACHE_MAX_LOOKUP_ITERATIONS", defaults.max_lookup_iterations)?;

        let store = match std::env::var("WEBCACHE_CACHE_ENDPOINT") {
            Ok(endpoint) => StoreBackend::Memcached(endpoint),
            Err(_) => StoreBackend::Memory,
        };

        Ok(ServerConfig {
            listen_addr,
            store,
            core: CoreConfig {
                freshness_window,
                backoff_base,
                backoff_cap,
                max_body_bytes,
                max_lookup_iterations,
                origin_port,
            },
        })
    }
}
