//! Binary entry point: reads configuration from the environment, builds
//! the configured [`CacheStore`](webcache_store::CacheStore) backend, and
//! serves every request through [`webcache_core::CacheHandler`].

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use http::Request;
use http_body_util::BodyExt;
use log::{info, warn};
use tower::Service;
use webcache_core::{CacheHandler, ClientAddr};
use webcache_store::memory::InMemoryStore;

use crate::config::{ServerConfig, StoreBackend};

async fn serve(
    State(handler): State<CacheHandler>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(ClientAddr(addr.ip()));

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read request body: {e}");
            return axum::http::StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut handler = handler;
    match handler.call(Request::from_parts(parts, bytes)).await {
        Ok(resp) => resp.map(Body::from).into_response(),
        Err(never) => match never {},
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from_env()?;
    info!("starting webcached on {}", config.listen_addr);

    let store: Arc<dyn webcache_store::CacheStore> = match &config.store {
        StoreBackend::Memory => {
            info!("using in-process store (not shared across processes)");
            Arc::new(InMemoryStore::new())
        }
        #[cfg(feature = "memcached")]
        StoreBackend::Memcached(endpoint) => {
            info!("connecting to memcached at {endpoint}");
            Arc::new(webcache_store::memcached::MemcachedStore::connect(endpoint).await?)
        }
        #[cfg(not(feature = "memcached"))]
        StoreBackend::Memcached(_) => {
            return Err("WEBCACHE_CACHE_ENDPOINT set but the memcached feature is disabled".into());
        }
    };

    let handler = CacheHandler::new(store, config.core);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    let app = axum::Router::new().fallback(serve).with_state(handler);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
