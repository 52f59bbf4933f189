//! Master-side connection dispatch.
//!
//! # Data Flow
//! ```text
//! TcpListener::accept
//!     → dispatcher.rs dispatch_next (Accepted → InTransit)
//!     → worker_set.rs (cursor → ControlSender::send_descriptor)
//!     → local copy dropped; the worker now owns the connection
//! ```
//!
//! # Design Decisions
//! - One accept loop, one cursor, no internal backlog: a stalled worker
//!   channel holds up accept and the OS queue absorbs the rest
//! - A failed handoff closes that connection; there is no failover to
//!   another worker

pub mod dispatcher;
pub mod worker_set;

pub use dispatcher::Dispatcher;
pub use worker_set::WorkerSet;

/// Errors from the dispatch subsystem.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dispatcher needs at least one worker")]
    NoWorkers,
}
