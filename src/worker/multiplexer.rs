//! Per-worker readiness multiplexer.
//!
//! # Responsibilities
//! - Hold the registration set: the permanent control-channel entry plus one
//!   entry per client descriptor received
//! - Block in `wait_for_ready` until something registered is ready, without
//!   ever blocking on a single connection's I/O
//! - Run exchanges as tasks so a slow upstream never stalls readiness
//!   discovery for the other registered clients
//!
//! # Data Flow
//! ```text
//! OwnedFd ─register─▶ Registered ─readable─▶ Ready::Client ─begin_exchange─▶ Serving
//!                                                                  │
//!                          Ready::Finished ◀── exchange task done ─┘
//!                                 │
//!                            deregister (descriptor closed, entry removed)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::os::fd::OwnedFd;

use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinSet};

use crate::channel::{ControlReceiver, HandoffError};
use crate::net::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};

/// Something in the registration set became ready.
#[derive(Debug)]
pub enum Ready<T> {
    /// The control channel has a handoff (or a closure) to read.
    Control,
    /// The control channel cannot be polled any more.
    ControlLost(HandoffError),
    /// A registered client sent bytes; its exchange can start.
    Client { id: ConnectionId, stream: TcpStream },
    /// Waiting for a client's readiness failed.
    ClientFailed { id: ConnectionId, error: io::Error },
    /// A client's exchange finished.
    Finished { id: ConnectionId, outcome: T },
}

/// One client entry in the registration set.
#[derive(Debug)]
struct Registration {
    state: ConnectionState,
    peer: Option<SocketAddr>,
    exchange: Option<AbortHandle>,
    _guard: ConnectionGuard,
}

/// Registration set plus the event loop's blocking wait.
pub struct Multiplexer<T> {
    control: ControlReceiver,
    registrations: HashMap<ConnectionId, Registration>,
    pending: JoinSet<(ConnectionId, TcpStream, io::Result<()>)>,
    exchanges: JoinSet<(ConnectionId, T)>,
    tracker: ConnectionTracker,
}

impl<T: Send + 'static> Multiplexer<T> {
    /// Create a multiplexer with `control` as its permanent entry.
    pub fn new(control: ControlReceiver, tracker: ConnectionTracker) -> Self {
        Self {
            control,
            registrations: HashMap::new(),
            pending: JoinSet::new(),
            exchanges: JoinSet::new(),
            tracker,
        }
    }

    pub fn control(&self) -> &ControlReceiver {
        &self.control
    }

    /// Number of client entries in the registration set.
    pub fn registered(&self) -> usize {
        self.registrations.len()
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.registrations.get(&id).map(|r| r.state)
    }

    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.registrations.get(&id).and_then(|r| r.peer)
    }

    /// Take ownership of a received client descriptor and watch it for
    /// read-readiness.
    ///
    /// On error the descriptor has already been closed.
    pub fn register(&mut self, fd: OwnedFd) -> io::Result<ConnectionId> {
        let std_stream = StdTcpStream::from(fd);
        std_stream.set_nonblocking(true)?;
        let stream = TcpStream::from_std(std_stream)?;
        let peer = stream.peer_addr().ok();

        let guard = self.tracker.track();
        let id = guard.id();
        self.registrations.insert(
            id,
            Registration {
                state: ConnectionState::Registered,
                peer,
                exchange: None,
                _guard: guard,
            },
        );
        self.pending.spawn(async move {
            let ready = stream.readable().await;
            (id, stream, ready)
        });

        tracing::debug!(connection_id = %id, peer_addr = ?peer, "Client registered");
        Ok(id)
    }

    /// Run the exchange for a client reported by `Ready::Client`.
    pub fn begin_exchange<F>(&mut self, id: ConnectionId, exchange: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let handle = self.exchanges.spawn(async move { (id, exchange.await) });
        if let Some(registration) = self.registrations.get_mut(&id) {
            registration.state = ConnectionState::Serving;
            registration.exchange = Some(handle);
        }
    }

    /// Remove a client entry. Returns whether it was registered.
    pub fn deregister(&mut self, id: ConnectionId) -> bool {
        match self.registrations.remove(&id) {
            Some(registration) => {
                if let Some(handle) = registration.exchange {
                    handle.abort();
                }
                tracing::debug!(connection_id = %id, "Client deregistered");
                true
            }
            None => false,
        }
    }

    /// Block until a registered descriptor or a running exchange is ready.
    ///
    /// Finished exchanges are reported first, then readable clients, then
    /// the control channel. There is no timeout; an idle worker sleeps here.
    pub async fn wait_for_ready(&mut self) -> Ready<T> {
        loop {
            tokio::select! {
                biased;

                Some(joined) = self.exchanges.join_next(), if !self.exchanges.is_empty() => {
                    match joined {
                        Ok((id, outcome)) => return Ready::Finished { id, outcome },
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Exchange task panicked");
                            self.sweep_finished();
                        }
                    }
                }

                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    match joined {
                        Ok((id, stream, Ok(()))) => return Ready::Client { id, stream },
                        Ok((id, _stream, Err(error))) => return Ready::ClientFailed { id, error },
                        Err(e) => tracing::error!(error = %e, "Readiness watch failed"),
                    }
                }

                result = self.control.readable() => {
                    return match result {
                        Ok(()) => Ready::Control,
                        Err(e) => Ready::ControlLost(HandoffError::Io(e)),
                    };
                }
            }
        }
    }

    /// Drop entries whose exchange task ended without reporting back.
    fn sweep_finished(&mut self) {
        self.registrations.retain(|id, registration| {
            let finished = registration
                .exchange
                .as_ref()
                .is_some_and(AbortHandle::is_finished);
            if finished {
                tracing::debug!(connection_id = %id, "Client deregistered after task failure");
            }
            !finished
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{pair, WorkerId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn accepted_pair() -> (TcpStream, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (client, accepted.into_std().unwrap())
    }

    #[tokio::test]
    async fn control_readiness_reported() {
        let (sender, receiver) = pair(WorkerId::from_index(0)).unwrap();
        let mut mux: Multiplexer<()> = Multiplexer::new(receiver, ConnectionTracker::new());

        let (_client, accepted) = accepted_pair().await;
        sender.send_descriptor(&accepted).await.unwrap();

        assert!(matches!(mux.wait_for_ready().await, Ready::Control));
        let fd = mux.control().try_recv_descriptor().unwrap().unwrap();
        let id = mux.register(fd).unwrap();
        assert_eq!(mux.state(id), Some(ConnectionState::Registered));
        assert!(mux.peer(id).is_some());
    }

    #[tokio::test]
    async fn client_lifecycle_through_registration_set() {
        let (_sender, receiver) = pair(WorkerId::from_index(0)).unwrap();
        let tracker = ConnectionTracker::new();
        let mut mux: Multiplexer<usize> = Multiplexer::new(receiver, tracker.clone());

        let (mut client, accepted) = accepted_pair().await;
        let id = mux.register(OwnedFd::from(accepted)).unwrap();
        assert_eq!(tracker.active_count(), 1);

        client.write_all(b"ping").await.unwrap();
        let stream = match mux.wait_for_ready().await {
            Ready::Client { id: ready, stream } => {
                assert_eq!(ready, id);
                stream
            }
            other => panic!("unexpected event {:?}", other),
        };

        mux.begin_exchange(id, async move {
            let mut stream = stream;
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(b"pong").await.unwrap();
            buf.len()
        });
        assert_eq!(mux.state(id), Some(ConnectionState::Serving));

        match mux.wait_for_ready().await {
            Ready::Finished { id: done, outcome } => {
                assert_eq!(done, id);
                assert_eq!(outcome, 4);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(mux.deregister(id));
        assert!(!mux.deregister(id));
        assert_eq!(mux.registered(), 0);
        assert_eq!(tracker.active_count(), 0);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong");
    }

    #[tokio::test]
    async fn slow_exchange_does_not_block_other_clients() {
        let (_sender, receiver) = pair(WorkerId::from_index(0)).unwrap();
        let mut mux: Multiplexer<&'static str> = Multiplexer::new(receiver, ConnectionTracker::new());

        let (mut slow_client, slow) = accepted_pair().await;
        let (mut fast_client, fast) = accepted_pair().await;
        let slow_id = mux.register(OwnedFd::from(slow)).unwrap();
        let fast_id = mux.register(OwnedFd::from(fast)).unwrap();

        slow_client.write_all(b"x").await.unwrap();
        match mux.wait_for_ready().await {
            Ready::Client { id, .. } => assert_eq!(id, slow_id),
            other => panic!("unexpected event {:?}", other),
        }
        mux.begin_exchange(slow_id, std::future::pending());

        fast_client.write_all(b"y").await.unwrap();
        match mux.wait_for_ready().await {
            Ready::Client { id, stream } => {
                assert_eq!(id, fast_id);
                mux.begin_exchange(id, async move {
                    drop(stream);
                    "fast"
                });
            }
            other => panic!("unexpected event {:?}", other),
        }

        match mux.wait_for_ready().await {
            Ready::Finished { id, outcome } => {
                assert_eq!(id, fast_id);
                assert_eq!(outcome, "fast");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(mux.state(slow_id), Some(ConnectionState::Serving));
    }

    #[tokio::test]
    async fn closed_control_channel_is_reported_ready() {
        let (sender, receiver) = pair(WorkerId::from_index(0)).unwrap();
        let mut mux: Multiplexer<()> = Multiplexer::new(receiver, ConnectionTracker::new());
        drop(sender);

        assert!(matches!(mux.wait_for_ready().await, Ready::Control));
        let err = mux.control().try_recv_descriptor().unwrap_err();
        assert!(err.is_channel_lost());
    }
}
