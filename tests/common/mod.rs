//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prefork_proxy::channel::{pair, ControlSender, WorkerId};
use prefork_proxy::config::ProxyConfig;
use prefork_proxy::worker::{WorkerError, WorkerRuntime, WorkerStats};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Canned response used by most tests.
pub const OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";

/// A stub upstream answering every request with a fixed response.
pub struct StubUpstream {
    pub addr: SocketAddr,
    requests: Arc<AtomicUsize>,
}

impl StubUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of complete request heads received so far.
    #[allow(dead_code)]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Start a stub upstream on an ephemeral port.
pub async fn start_stub_upstream(response: &'static [u8]) -> StubUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let counter = Arc::clone(&counter);
                    tokio::spawn(async move {
                        if read_head(&mut socket).await.is_some() {
                            counter.fetch_add(1, Ordering::SeqCst);
                            let _ = socket.write_all(response).await;
                        }
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    StubUpstream { addr, requests }
}

/// An address nothing is listening on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn read_head(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(buf)
}

/// In-process workers connected through socket pairs.
pub struct TestWorkers {
    pub senders: Vec<ControlSender>,
    pub stats: Vec<WorkerStats>,
    pub tasks: Vec<JoinHandle<WorkerError>>,
}

/// Start `count` workers forwarding to `upstream`.
pub fn spawn_workers(count: usize, upstream: &str) -> TestWorkers {
    let mut config = ProxyConfig::default();
    config.upstream.servers = vec![upstream.to_string()];
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;
    config.timeouts.client_read_secs = 5;

    let mut workers = TestWorkers {
        senders: Vec::new(),
        stats: Vec::new(),
        tasks: Vec::new(),
    };
    for index in 0..count {
        let id = WorkerId::from_index(index);
        let runtime = WorkerRuntime::new(id, &config).unwrap();
        let (sender, receiver) = pair(id).unwrap();
        workers.stats.push(runtime.stats());
        workers.senders.push(sender);
        workers.tasks.push(tokio::spawn(runtime.serve(receiver)));
    }
    workers
}

/// Send `request` to `addr` and read until the proxy closes the connection.
pub async fn round_trip(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), client.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

/// Poll `condition` until it holds or a few seconds pass.
#[allow(dead_code)]
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
