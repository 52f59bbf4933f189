//! Network layer primitives shared by the master and the workers.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → dispatch (accept loop, round-robin handoff)
//!     → channel (SCM_RIGHTS transfer to one worker)
//!     → worker (registration, exchange, close)
//! ```
//!
//! connection.rs names the states a client descriptor moves through and
//! counts the descriptors a process currently owns.

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
