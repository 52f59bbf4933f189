//! prefork-proxy
//!
//! A reverse proxy built on a pre-forked worker-process model.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────── master ────────────────────────┐
//!   Client          │  ┌──────────┐    ┌────────────┐    ┌────────────────┐  │
//!   ────────────────┼─▶│ dispatch │───▶│ WorkerSet  │───▶│ channel        │  │
//!                   │  │ accept   │    │ round-robin│    │ SCM_RIGHTS     │  │
//!                   │  └──────────┘    └────────────┘    └───────┬────────┘  │
//!                   │  lifecycle: supervisor, signals, shutdown  │           │
//!                   └────────────────────────────────────────────┼───────────┘
//!                                                                 │ fd
//!                   ┌──────────────────────── worker N ──────────▼───────────┐
//!                   │  ┌─────────────┐    ┌──────────┐    ┌──────────────┐   │
//!   Client  ◀───────┼──│ multiplexer │───▶│ exchange │───▶│ upstream     │───┼──▶ Upstream
//!                   │  │ (readiness) │    │ http     │    │ round-robin  │   │    Server
//!                   │  └─────────────┘    └──────────┘    └──────────────┘   │
//!                   └────────────────────────────────────────────────────────┘
//! ```
//!
//! The same binary runs both roles: `prefork-proxy [master]` starts the
//! master, which spawns itself as `prefork-proxy worker --id N --channel P`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use prefork_proxy::channel::WorkerId;
use prefork_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use prefork_proxy::lifecycle::{run_master, run_worker};
use prefork_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "prefork-proxy")]
#[command(about = "Pre-forked reverse proxy with descriptor-passing workers", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the master: accept connections and dispatch them to workers (default)
    Master(MasterArgs),
    /// Run one worker (spawned by the master)
    Worker {
        /// Worker id, starting at 1
        #[arg(long)]
        id: usize,
        /// Control channel socket to connect to
        #[arg(long)]
        channel: PathBuf,
    },
}

#[derive(Args, Default)]
struct MasterArgs {
    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    listen: Option<String>,

    /// Number of worker processes
    #[arg(short, long)]
    workers: Option<usize>,

    /// Upstream base URL; repeat for several
    #[arg(short, long)]
    upstream: Vec<String>,

    /// Directory for control-channel sockets
    #[arg(long)]
    run_dir: Option<PathBuf>,
}

impl MasterArgs {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
        if !self.upstream.is_empty() {
            config.upstream.servers = self.upstream;
        }
        if let Some(run_dir) = self.run_dir {
            config.workers.run_dir = run_dir;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    logging::init(&config.observability.log_level);

    match cli.command.unwrap_or(Command::Master(MasterArgs::default())) {
        Command::Master(args) => {
            args.apply(&mut config);
            validate_config(&config).map_err(ConfigError::Validation)?;

            tracing::info!("prefork-proxy v{} starting", env!("CARGO_PKG_VERSION"));
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_master(config))?;
        }
        Command::Worker { id, channel } => {
            let id = WorkerId::new(id).ok_or("worker id must be at least 1")?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_worker(id, &channel, &config))?;
        }
    }

    Ok(())
}
