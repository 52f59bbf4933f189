//! Accept loop and descriptor handoff.
//!
//! # Responsibilities
//! - Bind the public listening socket
//! - Hand every accepted connection to the next worker before accepting again
//! - Survive accept errors and failed handoffs
//!
//! # Design Decisions
//! - Accept errors pause the loop briefly instead of spinning on EMFILE
//! - The master never reads from a client socket

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::dispatch::{DispatchError, WorkerSet};
use crate::net::{ConnectionId, ConnectionState};

/// Pause after a failed `accept()` before trying again.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Owns the listening socket and the worker set.
#[derive(Debug)]
pub struct Dispatcher {
    listener: TcpListener,
    workers: WorkerSet,
    dispatched: u64,
    failed: u64,
}

impl Dispatcher {
    /// Bind `address` and prepare to dispatch to `workers`.
    pub async fn bind(address: &str, workers: WorkerSet) -> Result<Self, DispatchError> {
        let bind_error = |source| DispatchError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(address = %local_addr, workers = workers.len(), "Dispatcher listening");

        Ok(Self {
            listener,
            workers,
            dispatched: 0,
            failed: 0,
        })
    }

    /// Bind and run the accept loop until `shutdown` fires.
    pub async fn start(
        address: &str,
        workers: WorkerSet,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), DispatchError> {
        Self::bind(address, workers).await?.run(shutdown).await;
        Ok(())
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(
                        dispatched = self.dispatched,
                        failed = self.failed,
                        "Dispatcher stopping"
                    );
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch_next(stream, peer).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                },
            }
        }
    }

    /// Hand `stream` to the next worker and close the local copy.
    pub async fn dispatch_next(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId::new();
        tracing::trace!(connection_id = %id, peer_addr = %peer, state = %ConnectionState::Accepted, "Connection accepted");

        tracing::trace!(connection_id = %id, state = %ConnectionState::InTransit, "Handing off");
        let (worker, result) = self.workers.dispatch(&stream).await;
        drop(stream);

        match result {
            Ok(()) => {
                self.dispatched += 1;
                tracing::debug!(connection_id = %id, peer_addr = %peer, worker_id = %worker, "Connection handed off");
            }
            Err(e) => {
                self.failed += 1;
                tracing::warn!(
                    connection_id = %id,
                    peer_addr = %peer,
                    worker_id = %worker,
                    error = %e,
                    "Handoff failed, connection closed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{pair, WorkerId};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn bind_failure_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let (sender, _receiver) = pair(WorkerId::from_index(0)).unwrap();
        let workers = WorkerSet::new(vec![sender]).unwrap();

        let err = Dispatcher::bind(&addr, workers).await.unwrap_err();
        assert!(matches!(err, DispatchError::Bind { .. }));
    }

    #[tokio::test]
    async fn failed_handoff_closes_client() {
        let (sender, receiver) = pair(WorkerId::from_index(0)).unwrap();
        drop(receiver);
        let workers = WorkerSet::new(vec![sender]).unwrap();
        let mut dispatcher = Dispatcher::bind("127.0.0.1:0", workers).await.unwrap();
        let addr = dispatcher.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = dispatcher.listener.accept().await.unwrap();
        dispatcher.dispatch_next(stream, peer).await;
        assert_eq!(dispatcher.failed, 1);

        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (sender, _receiver) = pair(WorkerId::from_index(0)).unwrap();
        let workers = WorkerSet::new(vec![sender]).unwrap();
        let dispatcher = Dispatcher::bind("127.0.0.1:0", workers).await.unwrap();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(dispatcher.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
