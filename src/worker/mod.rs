//! Worker process subsystem.
//!
//! # Data Flow
//! ```text
//! control channel ─▶ multiplexer.rs (registration set, wait_for_ready)
//!                         │
//!                         ├─ Control  → recv handoff → register client
//!                         ├─ Client   → exchange.rs (read, rewrite, dial, relay)
//!                         └─ Finished → deregister, close client
//!
//! runtime.rs drives the loop and owns the worker state machine.
//! ```
//!
//! # Design Decisions
//! - One current-thread runtime per worker process; parallelism comes from
//!   running several workers
//! - Exchanges run as tasks on that thread, so a slow upstream only delays
//!   its own client
//! - Only control-channel loss ends the worker

pub mod exchange;
pub mod multiplexer;
pub mod runtime;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::channel::HandoffError;
use crate::load_balancer::UpstreamError;
use crate::net::ConnectionTracker;

pub use exchange::{ExchangeError, ExchangeSettings, ExchangeSummary};
pub use multiplexer::{Multiplexer, Ready};
pub use runtime::{run, WorkerRuntime, WorkerState};

/// Errors that end a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid upstream configuration: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("failed to connect control channel {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("control channel lost: {0}")]
    ControlChannelLost(#[source] HandoffError),
}

/// Live counters for one worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    inner: Arc<Counters>,
    connections: ConnectionTracker,
}

#[derive(Debug, Default)]
struct Counters {
    handoffs_received: AtomicU64,
    handoffs_rejected: AtomicU64,
    exchanges_completed: AtomicU64,
    exchanges_failed: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub handoffs_received: u64,
    pub handoffs_rejected: u64,
    pub exchanges_completed: u64,
    pub exchanges_failed: u64,
    pub open_connections: u64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker for the client descriptors this worker holds open.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    pub fn record_handoff(&self) {
        self.inner.handoffs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_handoff(&self) {
        self.inner.handoffs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exchange(&self, ok: bool) {
        let counter = if ok {
            &self.inner.exchanges_completed
        } else {
            &self.inner.exchanges_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            handoffs_received: self.inner.handoffs_received.load(Ordering::Relaxed),
            handoffs_rejected: self.inner.handoffs_rejected.load(Ordering::Relaxed),
            exchanges_completed: self.inner.exchanges_completed.load(Ordering::Relaxed),
            exchanges_failed: self.inner.exchanges_failed.load(Ordering::Relaxed),
            open_connections: self.connections.active_count(),
        }
    }
}
