//! Worker runtime and event loop.
//!
//! # Responsibilities
//! - Walk the worker state machine: Initializing → Connected → Serving, and
//!   Terminating once the control channel is lost
//! - Receive handoffs and register the client descriptors they carry
//! - Start one exchange per readable client and account for its outcome
//!
//! # Design Decisions
//! - A rejected handoff costs one connection, never the worker
//! - Exchange failures are logged and counted, nothing is sent to the client

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::Instrument;

use crate::channel::{ControlReceiver, HandoffError, WorkerId};
use crate::config::ProxyConfig;
use crate::load_balancer::UpstreamPool;
use crate::net::ConnectionId;
use crate::worker::exchange::{self, ExchangeError, ExchangeSettings, ExchangeSummary};
use crate::worker::multiplexer::{Multiplexer, Ready};
use crate::worker::{WorkerError, WorkerStats};

/// Lifecycle state of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Connected,
    Serving,
    Terminating,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Connected => "connected",
            WorkerState::Serving => "serving",
            WorkerState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

type Outcome = Result<ExchangeSummary, ExchangeError>;

/// The forwarding side of one worker.
#[derive(Debug)]
pub struct WorkerRuntime {
    id: WorkerId,
    state: WorkerState,
    settings: Arc<ExchangeSettings>,
    upstreams: UpstreamPool,
    stats: WorkerStats,
}

impl WorkerRuntime {
    pub fn new(id: WorkerId, config: &ProxyConfig) -> Result<Self, WorkerError> {
        Ok(Self {
            id,
            state: WorkerState::Initializing,
            settings: Arc::new(ExchangeSettings::from_config(config)),
            upstreams: UpstreamPool::from_config(&config.upstream)?,
            stats: WorkerStats::new(),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Shared handle to this worker's counters.
    pub fn stats(&self) -> WorkerStats {
        self.stats.clone()
    }

    /// Connect to the master's control channel at `path`.
    pub async fn connect(&mut self, path: &Path) -> Result<ControlReceiver, WorkerError> {
        let control = ControlReceiver::connect(path)
            .await
            .map_err(|source| WorkerError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        self.transition(WorkerState::Connected);
        Ok(control)
    }

    /// Serve handoffs from `control` until the channel is lost.
    ///
    /// Returns the error that ended the worker.
    pub async fn serve(mut self, control: ControlReceiver) -> WorkerError {
        if self.state == WorkerState::Initializing {
            self.transition(WorkerState::Connected);
        }
        let mut mux: Multiplexer<Outcome> =
            Multiplexer::new(control, self.stats.connections().clone());
        self.transition(WorkerState::Serving);

        let error = loop {
            match mux.wait_for_ready().await {
                Ready::Control => {
                    if let Err(e) = self.accept_handoffs(&mut mux) {
                        break e;
                    }
                }
                Ready::ControlLost(e) => break e,
                Ready::Client { id, stream } => {
                    let upstream = self.upstreams.next();
                    let settings = Arc::clone(&self.settings);
                    let span = tracing::debug_span!("exchange", connection_id = %id, upstream = %upstream);
                    mux.begin_exchange(
                        id,
                        async move {
                            let mut stream = stream;
                            exchange::forward(&mut stream, &upstream, &settings).await
                        }
                        .instrument(span),
                    );
                }
                Ready::ClientFailed { id, error } => {
                    tracing::warn!(connection_id = %id, error = %error, "Client readiness failed");
                    self.stats.record_exchange(false);
                    mux.deregister(id);
                }
                Ready::Finished { id, outcome } => {
                    let peer = mux.peer(id);
                    self.finish(id, peer, outcome);
                    mux.deregister(id);
                }
            }
        };

        self.transition(WorkerState::Terminating);
        tracing::error!(error = %error, open_connections = mux.registered(), "Control channel lost");
        WorkerError::ControlChannelLost(error)
    }

    /// Drain every queued handoff. Only a lost channel is returned as an error.
    fn accept_handoffs(&self, mux: &mut Multiplexer<Outcome>) -> Result<(), HandoffError> {
        loop {
            match mux.control().try_recv_descriptor() {
                Ok(Some(fd)) => {
                    self.stats.record_handoff();
                    if let Err(e) = mux.register(fd) {
                        tracing::warn!(error = %e, "Failed to register client connection");
                        self.stats.record_exchange(false);
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) if e.is_channel_lost() => return Err(e),
                Err(e) => {
                    self.stats.record_rejected_handoff();
                    tracing::warn!(error = %e, "Rejected handoff");
                }
            }
        }
    }

    fn finish(&self, id: ConnectionId, peer: Option<SocketAddr>, outcome: Outcome) {
        match outcome {
            Ok(summary) => {
                self.stats.record_exchange(true);
                tracing::info!(
                    connection_id = %id,
                    peer_addr = ?peer,
                    method = %summary.method,
                    path = %summary.path,
                    upstream = %summary.upstream,
                    status = summary.status,
                    response_bytes = summary.response_bytes,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Exchange completed"
                );
            }
            Err(e) if e.is_client_side() => {
                self.stats.record_exchange(false);
                tracing::debug!(connection_id = %id, peer_addr = ?peer, error = %e, "Exchange abandoned");
            }
            Err(e) => {
                self.stats.record_exchange(false);
                tracing::warn!(connection_id = %id, peer_addr = ?peer, error = %e, "Exchange failed");
            }
        }
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(from = %self.state, to = %next, "Worker state change");
        self.state = next;
    }
}

/// Worker process entry point: connect to `channel` and serve until the
/// channel is lost.
pub async fn run(id: WorkerId, channel: &Path, config: &ProxyConfig) -> Result<(), WorkerError> {
    let span = tracing::info_span!("worker", id = %id);
    async move {
        let mut runtime = WorkerRuntime::new(id, config)?;
        let control = runtime.connect(channel).await?;
        tracing::info!(channel = %channel.display(), "Worker connected");
        Err(runtime.serve(control).await)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::pair;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn config_for(upstream: std::net::SocketAddr) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.upstream.servers = vec![format!("http://{}", upstream)];
        config
    }

    #[tokio::test]
    async fn serves_handed_off_connection() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK")
                .await
                .unwrap();
        });

        let id = WorkerId::new(1).unwrap();
        let runtime = WorkerRuntime::new(id, &config_for(upstream_addr)).unwrap();
        let stats = runtime.stats();
        let (sender, receiver) = pair(id).unwrap();
        let worker = tokio::spawn(runtime.serve(receiver));

        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(front.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = front.accept().await.unwrap();
        sender.send_descriptor(&accepted).await.unwrap();
        drop(accepted);

        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK");

        while stats.snapshot().exchanges_completed == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(sender);
        let err = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, WorkerError::ControlChannelLost(_)));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.handoffs_received, 1);
        assert_eq!(snapshot.exchanges_completed, 1);
        assert_eq!(snapshot.open_connections, 0);
    }

    #[tokio::test]
    async fn invalid_upstream_rejected_at_startup() {
        let mut config = ProxyConfig::default();
        config.upstream.servers = vec!["ftp://example.com".into()];
        let err = WorkerRuntime::new(WorkerId::new(1).unwrap(), &config).unwrap_err();
        assert!(matches!(err, WorkerError::Upstream(_)));
    }

    #[tokio::test]
    async fn missing_channel_socket_fails_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = WorkerRuntime::new(WorkerId::new(2).unwrap(), &ProxyConfig::default()).unwrap();
        let err = runtime
            .connect(&dir.path().join("worker-2.sock"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Connect { .. }));
        assert_eq!(runtime.state(), WorkerState::Initializing);
    }
}
