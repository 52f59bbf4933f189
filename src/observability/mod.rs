//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch, worker, lifecycle
//!     → tracing events with worker_id / connection_id / peer_addr fields
//!     → logging.rs subscriber (EnvFilter + fmt) → stderr
//! ```
//!
//! Per-worker counters live in `worker::WorkerStats`.

pub mod logging;
