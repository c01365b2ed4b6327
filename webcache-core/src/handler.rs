//! The request handler (spec §4.H): ties classification, the reservation
//! protocol, the freshness engine, and response assembly together behind
//! a [`tower::Service`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use bytes::Bytes;
use http::{Request, Response};
use log::{error, warn};
use tower::Service;
use webcache_store::CacheStore;

use crate::assemble::{self, status, AssembledResponse};
use crate::config::Config;
use crate::fetch::OriginFetcher;
use crate::freshness::is_conditional_match;
use crate::reservation::{self, PublishOutcome, Step};

/// The address the client connected from, threaded through as a request
/// extension by the transport layer (`webcache-server`'s listener loop)
/// so the handler itself never needs to know how connections arrive.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub IpAddr);

/// Ties a [`CacheStore`] and an [`OriginFetcher`] to one [`Config`] and
/// exposes the whole pipeline as a cloneable [`tower::Service`].
///
/// The store is held as `Arc<dyn CacheStore>` rather than a generic
/// parameter so that `webcache-server` can pick its backend (in-memory or
/// memcached) at runtime from configuration, without the handler itself
/// needing a type parameter that would otherwise infect every caller.
#[derive(Clone)]
pub struct CacheHandler {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<OriginFetcher>,
    config: Config,
}

impl std::fmt::Debug for CacheHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandler")
            .field("fetcher", &self.fetcher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheHandler {
    /// Build a handler over the given store and configuration.
    pub fn new(store: Arc<dyn CacheStore>, config: Config) -> Self {
        CacheHandler { store, fetcher: Arc::new(OriginFetcher::new()), config }
    }

    async fn run(&self, req: Request<Bytes>) -> AssembledResponse {
        let (parts, _body) = req.into_parts();
        // A request that itself arrived from the loopback address means
        // the origin has looped back into this handler (the origin only
        // runs on 127.0.0.1): the request's own target tells us nothing,
        // since a re-entrant fetch is origin-form (`Host: 127.0.0.1`, no
        // absolute URI). The source address, set by the transport from
        // the real socket peer, is the only reliable signal.
        let source_is_loopback = parts
            .extensions
            .get::<ClientAddr>()
            .map(|addr| addr.0.is_loopback())
            .unwrap_or(false);
        if source_is_loopback {
            warn!("rejecting request originating from the loopback address the origin runs on");
            return AssembledResponse {
                status: 508,
                headers: vec![("content-length".into(), "0".into())],
                body: Vec::new(),
            };
        }

        if parts.method != http::Method::GET {
            return self.pass_through(&parts).await;
        }

        let url = format!("http://127.0.0.1:{}{}", self.config.origin_port, parts.uri);
        let request_headers: HashMap<String, String> = parts
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.as_str().to_string(), s.to_string())))
            .collect();
        let client_for = parts
            .extensions
            .get::<ClientAddr>()
            .map(|a| a.0.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let if_modified_since = parts
            .headers
            .get(http::header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());

        self.serve_cacheable(
            &url,
            &parts.uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_default(),
            &request_headers,
            &client_for,
            if_modified_since,
        )
        .await
    }

    async fn pass_through(&self, parts: &http::request::Parts) -> AssembledResponse {
        let request_headers: HashMap<String, String> = parts
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.as_str().to_string(), s.to_string())))
            .collect();
        let client_for = parts
            .extensions
            .get::<ClientAddr>()
            .map(|a| a.0.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let path_and_query = parts.uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_default();
        match self.fetcher.fetch(&self.config, &path_and_query, &request_headers, &client_for).await {
            Ok(resp) => assemble::assemble_uncached(resp.status, &resp.headers, resp.body),
            Err(e) => bad_gateway(&e.to_string()),
        }
    }

    async fn serve_cacheable(
        &self,
        url: &str,
        path_and_query: &str,
        request_headers: &HashMap<String, String>,
        client_for: &str,
        if_modified_since: Option<SystemTime>,
    ) -> AssembledResponse {
        let max_age = self.config.freshness_window.as_secs();
        let mut iterations = 0u32;
        // The reservation a prior iteration was told to wait on, if any.
        // A waiter rechecks with this same value on every wakeup rather
        // than contending for a new one.
        let mut pending: Option<u64> = None;
        loop {
            if iterations >= self.config.max_lookup_iterations {
                warn!("exhausted lookup iterations for {url}");
                return service_unavailable();
            }
            iterations += 1;

            let step = match reservation::step(self.store.as_ref(), url, &self.config, pending).await {
                Ok(s) => s,
                Err(e) => {
                    error!("store error during lookup for {url}: {e}");
                    return service_unavailable();
                }
            };

            match step {
                Step::Fresh(meta) => {
                    if is_conditional_match(&meta, if_modified_since) {
                        return assemble::assemble_not_modified(&meta, max_age);
                    }
                    match reservation::load_bound_content(self.store.as_ref(), &meta).await {
                        Ok(Some(content)) => {
                            return assemble::assemble_hit(&meta, &content, max_age, status::HIT);
                        }
                        Ok(None) => {
                            match reservation::elect_after_missing_content(
                                self.store.as_ref(),
                                meta,
                                &self.config,
                                pending,
                            )
                            .await
                            {
                                Ok(Step::Elected { meta, reservation: r }) => {
                                    return self
                                        .fetch_and_serve(
                                            url,
                                            path_and_query,
                                            request_headers,
                                            client_for,
                                            meta,
                                            r,
                                        )
                                        .await;
                                }
                                Ok(Step::Wait { reservation: r, delay }) => {
                                    pending = Some(r);
                                    tokio::time::sleep(delay).await;
                                    continue;
                                }
                                Ok(_) => {
                                    pending = None;
                                    continue;
                                }
                                Err(e) => {
                                    error!("store error re-electing after missing content for {url}: {e}");
                                    return service_unavailable();
                                }
                            }
                        }
                        Err(e) => {
                            error!("store error loading content for {url}: {e}");
                            return service_unavailable();
                        }
                    }
                }
                Step::Elected { meta, reservation: r } => {
                    return self
                        .fetch_and_serve(url, path_and_query, request_headers, client_for, meta, r)
                        .await;
                }
                Step::Wait { reservation: r, delay } => {
                    pending = Some(r);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Step::Restart => {
                    pending = None;
                    continue;
                }
            }
        }
    }

    async fn fetch_and_serve(
        &self,
        url: &str,
        path_and_query: &str,
        request_headers: &HashMap<String, String>,
        client_for: &str,
        meta: webcache_types::MetadataRecord,
        r: u64,
    ) -> AssembledResponse {
        let max_age = self.config.freshness_window.as_secs();
        let outcome = reservation::fetch_and_publish(
            self.store.as_ref(),
            &self.fetcher,
            &self.config,
            url,
            path_and_query,
            request_headers,
            client_for,
            meta,
            r,
        )
        .await;
        match outcome {
            Ok(PublishOutcome::Published(meta, content)) => {
                assemble::assemble_hit(&meta, &content, max_age, status::MISS_FETCH)
            }
            Ok(PublishOutcome::DegradedServe(fetched)) => {
                assemble::assemble_uncached(fetched.status, &fetched.headers, fetched.body)
            }
            Ok(PublishOutcome::OriginError(e)) => bad_gateway(&e.to_string()),
            Err(e) => {
                error!("store error publishing {url}: {e}");
                service_unavailable()
            }
        }
    }
}

fn bad_gateway(message: &str) -> AssembledResponse {
    AssembledResponse {
        status: 502,
        headers: vec![("content-type".into(), "text/plain".into())],
        body: format!("bad gateway: {message}").into_bytes(),
    }
}

fn service_unavailable() -> AssembledResponse {
    AssembledResponse {
        status: 503,
        headers: vec![("content-type".into(), "text/plain".into())],
        body: b"cache temporarily unavailable".to_vec(),
    }
}

fn into_http_response(assembled: AssembledResponse) -> Response<Bytes> {
    let mut builder = Response::builder().status(assembled.status);
    for (name, value) in &assembled.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Bytes::from(assembled.body)).expect("assembled responses carry only valid header values")
}

impl Service<Request<Bytes>> for CacheHandler {
    type Response = Response<Bytes>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(into_http_response(this.run(req).await)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubOrigin;
    use webcache_store::memory::InMemoryStore;

    #[tokio::test]
    async fn cold_get_fetches_and_caches() {
        let origin = StubOrigin::start(b"hello".to_vec()).await;
        let config = Config { origin_port: origin.port(), ..Config::default() };
        let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

        let req = Request::get("/p").body(Bytes::new()).unwrap();
        let resp = handler.call(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body().as_ref(), b"hello");
        assert_eq!(origin.connection_count(), 1);

        let req2 = Request::get("/p").body(Bytes::new()).unwrap();
        let resp2 = handler.call(req2).await.unwrap();
        assert_eq!(resp2.body().as_ref(), b"hello");
        assert_eq!(resp2.headers().get(assemble::STATUS_HEADER).unwrap(), status::HIT);
        assert_eq!(origin.connection_count(), 1);
    }

    #[tokio::test]
    async fn loopback_source_request_is_rejected() {
        let origin = StubOrigin::start(b"hello".to_vec()).await;
        let config = Config { origin_port: origin.port(), ..Config::default() };
        let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

        // a genuine re-entrant fetch arrives origin-form (target path
        // only, no absolute URI) with a loopback source address
        let mut req = Request::get("/p").body(Bytes::new()).unwrap();
        req.extensions_mut().insert(ClientAddr(IpAddr::from([127, 0, 0, 1])));
        let resp = handler.call(req).await.unwrap();
        assert_eq!(resp.status(), 508);
        assert_eq!(origin.connection_count(), 0);
    }

    #[tokio::test]
    async fn non_get_passes_through_uncached() {
        let origin = StubOrigin::start(b"ok".to_vec()).await;
        let config = Config { origin_port: origin.port(), ..Config::default() };
        let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

        let req = Request::post("/p").body(Bytes::new()).unwrap();
        let resp = handler.call(req).await.unwrap();
        assert_eq!(resp.headers().get(assemble::STATUS_HEADER).unwrap(), status::MISS_UNCACHED);
    }
}
