//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber for master and worker processes
//! - Pick the filter: `RUST_LOG` when set, otherwise the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Worker processes log to the stderr they inherit from the master, so one
//!   terminal shows the whole pool

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(level: &str) -> String {
    format!("prefork_proxy={}", level)
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_targets_this_crate() {
        assert_eq!(default_directive("debug"), "prefork_proxy=debug");
    }

    #[test]
    fn init_twice_is_harmless() {
        init("info");
        init("trace");
    }
}
