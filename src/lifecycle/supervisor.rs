//! Worker pool supervision.
//!
//! # Responsibilities
//! - Prepare the run directory and the config file workers start from
//! - Bind one control-channel socket per worker, removing stale files first
//! - Spawn each worker process and wait for it to connect back
//! - Watch every child, and terminate them all on shutdown
//!
//! # Design Decisions
//! - A worker that fails to start aborts master startup
//! - A worker that dies later is logged and marked dead, never restarted
//! - Children are spawned with `kill_on_drop` so an aborted master does not
//!   leave them behind

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::UnixListener;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::channel::{socket_path, ControlSender, WorkerId};
use crate::config::{save_config, ConfigError, ProxyConfig};
use crate::lifecycle::Shutdown;

/// Name of the config file the master writes for its workers.
pub const WORKER_CONFIG_FILE: &str = "proxy.toml";

/// How long a worker gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Errors raised while starting the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to prepare run directory {path}: {source}")]
    RunDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write worker config: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot locate worker program: {0}")]
    Program(#[source] io::Error),
    #[error("failed to bind control channel {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: WorkerId,
        #[source]
        source: io::Error,
    },
    #[error("worker {worker} did not connect its control channel: {source}")]
    Accept {
        worker: WorkerId,
        #[source]
        source: io::Error,
    },
    #[error("worker {worker} did not connect within {limit:?}")]
    StartupTimeout { worker: WorkerId, limit: Duration },
}

/// A running worker process.
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    alive: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl WorkerHandle {
    /// Whether the process has not been observed to exit.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// All worker processes started by this master.
#[derive(Debug)]
pub struct WorkerPool {
    run_dir: PathBuf,
    config_path: PathBuf,
    count: usize,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Start `config.workers.count` workers and return the master ends of
    /// their control channels, in worker order.
    pub async fn spawn(
        config: &ProxyConfig,
        shutdown: &Shutdown,
    ) -> Result<(Self, Vec<ControlSender>), SupervisorError> {
        let run_dir = config.workers.run_dir.clone();
        std::fs::create_dir_all(&run_dir).map_err(|source| SupervisorError::RunDir {
            path: run_dir.clone(),
            source,
        })?;

        let config_path = run_dir.join(WORKER_CONFIG_FILE);
        save_config(config, &config_path)?;

        let program = match &config.workers.program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(SupervisorError::Program)?,
        };

        let mut pool = Self {
            run_dir,
            config_path,
            count: config.workers.count,
            workers: Vec::with_capacity(config.workers.count),
        };
        let mut channels = Vec::with_capacity(config.workers.count);

        for index in 0..config.workers.count {
            let id = WorkerId::from_index(index);
            match pool.start_worker(id, &program, config, shutdown).await {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    shutdown.trigger();
                    pool.wait().await;
                    return Err(e);
                }
            }
        }

        tracing::info!(workers = channels.len(), run_dir = %pool.run_dir.display(), "Worker pool started");
        Ok((pool, channels))
    }

    async fn start_worker(
        &mut self,
        id: WorkerId,
        program: &Path,
        config: &ProxyConfig,
        shutdown: &Shutdown,
    ) -> Result<ControlSender, SupervisorError> {
        let path = socket_path(&self.run_dir, id);
        remove_stale(&path).map_err(|source| SupervisorError::Bind {
            path: path.clone(),
            source,
        })?;
        let listener = UnixListener::bind(&path).map_err(|source| SupervisorError::Bind {
            path: path.clone(),
            source,
        })?;

        let mut child = Command::new(program)
            .arg("--config")
            .arg(&self.config_path)
            .arg("worker")
            .arg("--id")
            .arg(id.to_string())
            .arg("--channel")
            .arg(&path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn { worker: id, source })?;
        let pid = child.id();
        tracing::debug!(worker_id = %id, pid = ?pid, channel = %path.display(), "Worker spawned");

        let limit = config.workers.startup_timeout();
        let accepted = tokio::select! {
            accepted = tokio::time::timeout(limit, listener.accept()) => accepted,
            status = child.wait() => {
                return Err(SupervisorError::Accept {
                    worker: id,
                    source: io::Error::other(format!("worker exited during startup: {}", describe(status))),
                });
            }
        };
        let stream = match accepted {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(source)) => return Err(SupervisorError::Accept { worker: id, source }),
            Err(_) => return Err(SupervisorError::StartupTimeout { worker: id, limit }),
        };

        let alive = Arc::new(AtomicBool::new(true));
        let watcher = tokio::spawn(watch(id, child, Arc::clone(&alive), shutdown.subscribe()));
        self.workers.push(WorkerHandle { id, alive, watcher });

        tracing::info!(worker_id = %id, pid = ?pid, "Worker connected");
        Ok(ControlSender::new(id, stream))
    }

    /// Number of workers not yet observed to exit.
    pub fn alive(&self) -> usize {
        self.workers.iter().filter(|w| w.is_alive()).count()
    }

    /// Wait for every worker to exit, then remove the sockets and config file.
    ///
    /// Workers only exit on their own if their channel closes, so callers
    /// normally trigger shutdown first.
    pub async fn wait(&mut self) {
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.watcher.await {
                tracing::error!(worker_id = %worker.id, error = %e, "Worker watcher failed");
            }
        }
        self.cleanup();
    }

    fn cleanup(&self) {
        let sockets = (0..self.count).map(|index| socket_path(&self.run_dir, WorkerId::from_index(index)));
        for file in sockets.chain(std::iter::once(self.config_path.clone())) {
            if let Err(e) = remove_stale(&file) {
                tracing::warn!(path = %file.display(), error = %e, "Failed to remove run file");
            }
        }
    }
}

/// Watch one child until it exits, terminating it on shutdown.
async fn watch(
    id: WorkerId,
    mut child: Child,
    alive: Arc<AtomicBool>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => {
            tracing::error!(worker_id = %id, status = %describe(status), "Worker exited unexpectedly");
            alive.store(false, Ordering::SeqCst);
            return;
        }
        _ = shutdown.recv() => terminate(id, &mut child).await,
    };

    alive.store(false, Ordering::SeqCst);
    tracing::info!(worker_id = %id, status = %describe(status), "Worker stopped");
}

/// SIGTERM, then SIGKILL after the grace period.
async fn terminate(id: WorkerId, child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            tracing::warn!(worker_id = %id, error = %e, "Failed to signal worker");
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(worker_id = %id, "Worker ignored SIGTERM, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

fn describe(status: io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("unknown ({})", e),
    }
}

fn remove_stale(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path, program: &str) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.workers.count = 2;
        config.workers.run_dir = dir.to_path_buf();
        config.workers.program = Some(PathBuf::from(program));
        config.workers.startup_timeout_secs = 1;
        config
    }

    #[test]
    fn stale_socket_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker-1.sock");
        std::fs::write(&path, b"").unwrap();
        remove_stale(&path).unwrap();
        assert!(!path.exists());
        remove_stale(&path).unwrap();
    }

    #[tokio::test]
    async fn missing_program_fails_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "/nonexistent/prefork-proxy");
        let err = WorkerPool::spawn(&config, &Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(!dir.path().join("worker-1.sock").exists());
        assert!(!dir.path().join(WORKER_CONFIG_FILE).exists());
    }

    #[tokio::test]
    async fn exited_worker_no_longer_counted_alive() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Shutdown::new();
        let id = WorkerId::from_index(0);
        let child = Command::new("/bin/sh").arg("-c").arg("exit 3").spawn().unwrap();
        let alive = Arc::new(AtomicBool::new(true));
        let watcher = tokio::spawn(watch(id, child, Arc::clone(&alive), shutdown.subscribe()));

        let mut pool = WorkerPool {
            run_dir: dir.path().to_path_buf(),
            config_path: dir.path().join(WORKER_CONFIG_FILE),
            count: 1,
            workers: vec![WorkerHandle { id, alive, watcher }],
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pool.alive() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.alive(), 0);
        pool.wait().await;
    }

    #[tokio::test]
    async fn worker_that_never_connects_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        // sh rejects the worker arguments and exits without connecting.
        let config = config_in(dir.path(), "/bin/sh");
        let err = WorkerPool::spawn(&config, &Shutdown::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Accept { .. } | SupervisorError::StartupTimeout { .. }
        ));
    }
}
