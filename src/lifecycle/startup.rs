//! Process entry points.
//!
//! # Responsibilities
//! - Master: start the worker pool, then the dispatcher, then wait for a
//!   termination signal and tear everything down in reverse order
//! - Worker: serve one control channel until it is lost
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Workers are connected before the public socket is bound, so the first
//!   accepted connection already has somewhere to go

use std::path::Path;

use crate::channel::WorkerId;
use crate::config::ProxyConfig;
use crate::dispatch::{DispatchError, Dispatcher, WorkerSet};
use crate::lifecycle::signals::wait_for_termination;
use crate::lifecycle::supervisor::{SupervisorError, WorkerPool};
use crate::lifecycle::Shutdown;
use crate::worker::{self, WorkerError};

/// Errors that stop the master.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

/// Run the master until SIGINT or SIGTERM.
pub async fn run_master(config: ProxyConfig) -> Result<(), StartupError> {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        workers = config.workers.count,
        upstreams = ?config.upstream.servers,
        "Master starting"
    );

    let shutdown = Shutdown::new();
    let (mut pool, channels) = WorkerPool::spawn(&config, &shutdown).await?;

    let dispatcher = match WorkerSet::new(channels) {
        Ok(workers) => Dispatcher::bind(&config.listener.bind_address, workers).await,
        Err(e) => Err(e),
    };
    let dispatcher = match dispatcher {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            shutdown.trigger();
            pool.wait().await;
            return Err(e.into());
        }
    };
    let accept_loop = tokio::spawn(dispatcher.run(shutdown.subscribe()));

    let signal = wait_for_termination().await;
    match &signal {
        Ok(signal) => tracing::info!(signal = %signal, workers_alive = pool.alive(), "Shutdown requested"),
        Err(e) => tracing::error!(error = %e, workers_alive = pool.alive(), "Signal handling failed, shutting down"),
    }

    shutdown.trigger();
    if let Err(e) = accept_loop.await {
        tracing::error!(error = %e, "Accept loop failed");
    }
    pool.wait().await;
    tracing::info!("Shutdown complete");

    signal.map(|_| ()).map_err(StartupError::Signals)
}

/// Run a worker process until its control channel is lost.
pub async fn run_worker(id: WorkerId, channel: &Path, config: &ProxyConfig) -> Result<(), WorkerError> {
    worker::run(id, channel, config).await
}
