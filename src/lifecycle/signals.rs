//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM or SIGINT in the master
//! - Translate the signal into a shutdown trigger
//!
//! Workers install no handlers: the default SIGTERM action ends them, which
//! closes every descriptor they hold.

use std::io;

use tokio::signal::unix::{signal, SignalKind};

/// Signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Interrupt => f.write_str("SIGINT"),
            Termination::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Wait until SIGINT or SIGTERM arrives.
pub async fn wait_for_termination() -> io::Result<Termination> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => Ok(Termination::Interrupt),
        _ = terminate.recv() => Ok(Termination::Terminate),
    }
}
