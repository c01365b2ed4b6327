//! A minimal loopback HTTP origin for integration tests, replacing a
//! mocking crate with something that can count raw TCP connections —
//! needed to assert the thundering-herd scenario opens exactly one
//! connection to the origin.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A loopback server that answers every request with a fixed 200 body,
/// optionally bumping `Last-Modified` on each call, and counts how many
/// TCP connections it has accepted.
pub struct StubOrigin {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl StubOrigin {
    /// Start a stub origin that always serves `body` with status 200.
    pub async fn start(body: Vec<u8>) -> Self {
        Self::start_with_status(200, body).await
    }

    /// Start a stub origin serving a fixed status and body.
    pub async fn start_with_status(status: u16, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("loopback bind");
        let port = listener.local_addr().expect("local addr").port();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let conn_count = connections.clone();
        let req_count = requests.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                conn_count.fetch_add(1, Ordering::SeqCst);
                let req_count = req_count.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let Ok(n) = socket.read(&mut buf).await else { return };
                    if n == 0 {
                        return;
                    }
                    req_count.fetch_add(1, Ordering::SeqCst);
                    let response = format!(
                        "HTTP/1.1 {status} OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        StubOrigin { port, connections, requests, _handle: handle }
    }

    /// The loopback port this origin is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of TCP connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Number of complete requests served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// A counter of how many times a closure-backed stub has been hit, used
/// by scenarios that need a changing body across successive fetches.
#[derive(Default)]
pub struct CallCounter(AtomicU32);

impl CallCounter {
    /// Bump and return the previous count.
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}
