//! Loopback origin stub shared by the scenario tests in this directory.
//! Mirrors `webcache_core::test_support::StubOrigin` but lives here
//! since integration test binaries cannot see the crate's private,
//! `cfg(test)`-gated unit-test module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct StubOrigin {
    port: u16,
    connections: Arc<AtomicUsize>,
    body: Arc<std::sync::Mutex<Vec<u8>>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl StubOrigin {
    pub async fn start(body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("loopback bind");
        let port = listener.local_addr().expect("local addr").port();
        let connections = Arc::new(AtomicUsize::new(0));
        let body = Arc::new(std::sync::Mutex::new(body));
        let conn_count = connections.clone();
        let shared_body = body.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                conn_count.fetch_add(1, Ordering::SeqCst);
                let body = shared_body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let Ok(n) = socket.read(&mut buf).await else { return };
                    if n == 0 {
                        return;
                    }
                    let current = body.lock().unwrap().clone();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        current.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&current).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        StubOrigin { port, connections, body, _handle: handle }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Swap the body the origin serves on subsequent requests — used by
    /// the expiry scenarios to simulate origin content changing.
    pub fn set_body(&self, body: Vec<u8>) {
        *self.body.lock().unwrap() = body;
    }
}
