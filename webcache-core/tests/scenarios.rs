//! End-to-end scenarios against an in-memory store and a loopback stub
//! origin: cold miss, warm hit, conditional revalidation, expiry with and
//! without a body change, and the thundering-herd election guarantee.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::StubOrigin;
use http::Request;
use tower::Service;
use webcache_core::{status, CacheHandler, Config, STATUS_HEADER};
use webcache_store::memory::InMemoryStore;

fn config_for(origin_port: u16, freshness_window: Duration) -> Config {
    Config { origin_port, freshness_window, ..Config::default() }
}

#[tokio::test]
async fn cold_miss_then_warm_hit() {
    let origin = StubOrigin::start(b"first".to_vec()).await;
    let config = config_for(origin.port(), Duration::from_secs(60));
    let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

    let miss = handler.call(Request::get("/a").body(Bytes::new()).unwrap()).await.unwrap();
    assert_eq!(miss.status(), 200);
    assert_eq!(miss.body().as_ref(), b"first");
    assert_eq!(miss.headers().get(STATUS_HEADER).unwrap(), status::MISS_FETCH);
    assert_eq!(origin.connection_count(), 1);

    let hit = handler.call(Request::get("/a").body(Bytes::new()).unwrap()).await.unwrap();
    assert_eq!(hit.body().as_ref(), b"first");
    assert_eq!(hit.headers().get(STATUS_HEADER).unwrap(), status::HIT);
    assert_eq!(origin.connection_count(), 1, "warm hit must not reach the origin");
}

#[tokio::test]
async fn conditional_request_gets_304_without_reading_content() {
    let origin = StubOrigin::start(b"body".to_vec()).await;
    let config = config_for(origin.port(), Duration::from_secs(60));
    let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

    let first = handler.call(Request::get("/b").body(Bytes::new()).unwrap()).await.unwrap();
    let last_modified = first.headers().get(http::header::LAST_MODIFIED).unwrap().clone();

    let conditional = Request::get("/b")
        .header(http::header::IF_MODIFIED_SINCE, last_modified)
        .body(Bytes::new())
        .unwrap();
    let resp = handler.call(conditional).await.unwrap();
    assert_eq!(resp.status(), 304);
    assert!(resp.body().is_empty());
    assert_eq!(resp.headers().get(STATUS_HEADER).unwrap(), status::HIT_304);
}

#[tokio::test]
async fn expiry_with_unchanged_body_keeps_last_modified() {
    let origin = StubOrigin::start(b"stable".to_vec()).await;
    let config = config_for(origin.port(), Duration::from_millis(20));
    let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

    let first = handler.call(Request::get("/c").body(Bytes::new()).unwrap()).await.unwrap();
    let first_last_modified = first.headers().get(http::header::LAST_MODIFIED).unwrap().clone();

    tokio::time::sleep(Duration::from_millis(60)).await;

    let second = handler.call(Request::get("/c").body(Bytes::new()).unwrap()).await.unwrap();
    assert_eq!(second.body().as_ref(), b"stable");
    assert_eq!(
        second.headers().get(http::header::LAST_MODIFIED).unwrap(),
        &first_last_modified,
        "unchanged body must not bump Last-Modified"
    );
    assert_eq!(origin.connection_count(), 2, "stale lookup must re-fetch from origin");
}

#[tokio::test]
async fn expiry_with_changed_body_bumps_last_modified() {
    let origin = StubOrigin::start(b"v1".to_vec()).await;
    let config = config_for(origin.port(), Duration::from_millis(20));
    let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

    let first = handler.call(Request::get("/d").body(Bytes::new()).unwrap()).await.unwrap();
    let first_last_modified = first.headers().get(http::header::LAST_MODIFIED).unwrap().clone();

    tokio::time::sleep(Duration::from_millis(60)).await;
    origin.set_body(b"v2".to_vec());

    let second = handler.call(Request::get("/d").body(Bytes::new()).unwrap()).await.unwrap();
    assert_eq!(second.body().as_ref(), b"v2");
    assert_ne!(
        second.headers().get(http::header::LAST_MODIFIED).unwrap(),
        &first_last_modified,
        "changed body must bump Last-Modified"
    );
}

#[tokio::test]
async fn thundering_herd_opens_exactly_one_origin_connection() {
    let origin = StubOrigin::start(b"shared".to_vec()).await;
    let config = config_for(origin.port(), Duration::from_secs(60));
    let store = Arc::new(InMemoryStore::new());

    let mut tasks = Vec::new();
    for _ in 0..100 {
        let mut handler = CacheHandler::new(store.clone(), config);
        tasks.push(tokio::spawn(async move {
            handler.call(Request::get("/herd").body(Bytes::new()).unwrap()).await.unwrap()
        }));
    }

    let mut bodies = Vec::new();
    for task in tasks {
        let resp = task.await.unwrap();
        assert_eq!(resp.status(), 200);
        bodies.push(resp.body().clone());
    }
    assert!(bodies.iter().all(|b| b.as_ref() == b"shared"));
    assert_eq!(origin.connection_count(), 1, "exactly one worker should reach the origin");
}

#[tokio::test]
async fn loop_detected_on_direct_origin_target() {
    let origin = StubOrigin::start(b"x".to_vec()).await;
    let config = config_for(origin.port(), Duration::from_secs(60));
    let mut handler = CacheHandler::new(Arc::new(InMemoryStore::new()), config);

    let req = Request::get(format!("http://127.0.0.1:{}/x", origin.port())).body(Bytes::new()).unwrap();
    let resp = handler.call(req).await.unwrap();
    assert_eq!(resp.status(), 508);
}
