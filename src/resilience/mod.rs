//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Exchange in a worker:
//!     → timeouts.rs (client read deadline)
//!     → timeouts.rs (upstream connect deadline)
//!     → timeouts.rs (upstream write + response read deadline)
//!     → On any expiry: exchange abandoned, client closed without a response
//! ```
//!
//! # Design Decisions
//! - Every upstream call has a deadline so one slow upstream cannot pin a
//!   worker's exchange forever
//! - No retries: a failed exchange is dropped, never replayed

pub mod timeouts;

pub use timeouts::{with_timeout, Stage, TimeoutError};
