//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → supervisor.rs (run dir, sockets, spawn + connect workers)
//!            → Bind listener → Accept loop
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → SIGTERM workers → Remove run files
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: workers first, then the public listener
//! - Ordered shutdown: stop accept, terminate workers, clean up
//! - Worker termination has a deadline: SIGKILL after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use startup::{run_master, run_worker, StartupError};
pub use supervisor::{SupervisorError, WorkerHandle, WorkerPool};
