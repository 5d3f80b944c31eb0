//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use granblue_proxy::handlers::RequestHandler;
use granblue_proxy::http::{ProxyRequest, ProxyResponse, ResponseBuilder};
use granblue_proxy::lifecycle::Shutdown;
use granblue_proxy::net::{BufferPool, Connector, Listener, Pipe};
use granblue_proxy::proxy::{Gateway, ProxyServer};
use granblue_proxy::security::AccessControl;
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const MAX_HEADER_BYTES: usize = 64 * 1024;
pub const MAX_BODY_BYTES: usize = 1024;

/// Echo every byte back until the peer closes.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Origin that records each request head it reads and answers with `response`.
pub async fn start_origin(response: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&heads);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                seen.lock().unwrap().push(head);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, heads)
}

/// Read up to and including the blank line ending a message head.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Read one response with a `content-length` body. Returns the head and the body.
pub async fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let head = read_head(stream).await;
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    (head, body)
}

/// Connector that records what was dialed and connects to a local stand-in instead.
#[derive(Debug)]
pub struct RecordingConnector {
    target: Option<SocketAddr>,
    dials: Mutex<Vec<(String, u16)>>,
}

impl RecordingConnector {
    pub fn to(target: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            target: Some(target),
            dials: Mutex::new(Vec::new()),
        })
    }

    /// Every dial fails with connection refused.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            target: None,
            dials: Mutex::new(Vec::new()),
        })
    }

    pub fn dials(&self) -> Vec<(String, u16)> {
        self.dials.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        self.dials.lock().unwrap().push((host.to_string(), port));
        match self.target {
            Some(addr) => TcpStream::connect(addr).await,
            None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        }
    }
}

/// Handler that answers every request with a fixed body and remembers what it saw.
#[derive(Default)]
pub struct StubHandler {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    fail: bool,
}

impl StubHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails as if the origin were unreachable.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestHandler for StubHandler {
    async fn handle(&self, req: ProxyRequest) -> granblue_proxy::Result<ProxyResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(req.summary());
        if self.fail {
            return Err(granblue_proxy::ProxyError::Timeout(Duration::from_millis(1)));
        }
        Ok(ResponseBuilder::new(StatusCode::OK)
            .body(Bytes::from(format!("stub {}", req.url)))
            .build())
    }
}

pub fn gateway(router: Arc<dyn RequestHandler>, connector: Arc<dyn Connector>) -> Arc<Gateway> {
    Arc::new(Gateway::new(
        Arc::new(AccessControl::new()),
        router,
        connector,
        Pipe::new(Arc::new(BufferPool::default()), None),
        MAX_HEADER_BYTES,
        MAX_BODY_BYTES,
    ))
}

/// Run the accept loop on an ephemeral port.
pub async fn spawn_proxy(gateway: Arc<Gateway>) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(
        Listener::from_listener(listener, 64),
        gateway,
        Duration::from_secs(1),
    );
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(shutdown.clone()));
    (addr, shutdown)
}
