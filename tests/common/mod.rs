//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marketplace_ops::{AppConfig, HttpServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Mock upstream handle.
pub struct MockUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Raw request heads seen so far, lowercased.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// How the mock answers.
#[derive(Clone, Copy)]
pub enum Reply {
    /// `200` with a Content-Length body.
    Fixed(&'static str),
    /// `200` chunked; `Some(n)` ends after n chunks, `None` never ends.
    Chunked(Option<usize>),
}

/// Start a mock upstream that answers every request with `200` and `body`.
pub async fn start_mock_upstream(body: &'static str) -> MockUpstream {
    start_upstream(Reply::Fixed(body)).await
}

pub async fn start_upstream(reply: Reply) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let (counter, log) = (hits.clone(), requests.clone());

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(socket, reply, log.clone()));
                }
                Err(_) => break,
            }
        }
    });

    MockUpstream {
        addr,
        hits,
        requests,
    }
}

async fn serve(mut socket: TcpStream, reply: Reply, log: Arc<Mutex<Vec<String>>>) {
    // Small test requests arrive in one read.
    let mut buf = vec![0u8; 16 * 1024];
    let n = socket.read(&mut buf).await.unwrap_or(0);
    log.lock()
        .unwrap()
        .push(String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase());

    match reply {
        Reply::Fixed(body) => {
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
        Reply::Chunked(limit) => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let mut sent = 0;
            while limit.map_or(true, |max| sent < max) {
                if socket.write_all(b"6\r\ntick\n\n\r\n").await.is_err() {
                    return;
                }
                sent += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        }
    }
    let _ = socket.shutdown().await;
}

/// Start the gateway in front of `upstream`. Returns its address and the
/// shutdown handle keeping it alive.
pub async fn start_gateway(mut config: AppConfig, upstream: SocketAddr) -> (SocketAddr, Shutdown) {
    config.upstream.base_url = format!("http://{upstream}");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = HttpServer::new(config).run(listener, rx).await;
    });

    (addr, shutdown)
}
