//! Round-robin selection subsystem.
//!
//! # Data Flow
//! ```text
//! master: accepted connection
//!     → dispatch::WorkerSet (round_robin.rs cursor over control channels)
//!
//! worker: readable client connection
//!     → upstream.rs (UpstreamPool, round_robin.rs cursor over upstreams)
//! ```
//!
//! # Design Decisions
//! - Selection is strictly cyclic; no health or load feedback
//! - Cursors are owned by a single task and mutated through `&mut self`

pub mod round_robin;
pub mod upstream;

pub use round_robin::RoundRobin;
pub use upstream::{Upstream, UpstreamError, UpstreamPool};
