//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits so the master can both load a file and
//! re-serialize the effective configuration for its workers.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Public listener configuration.
    pub listener: ListenerConfig,

    /// Worker pool settings.
    pub workers: WorkerPoolConfig,

    /// Upstream server definitions.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request/response size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker processes spawned at startup.
    pub count: usize,

    /// Directory holding the control-channel sockets and the effective
    /// configuration handed to workers.
    pub run_dir: PathBuf,

    /// Worker executable. Defaults to the running executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,

    /// How long the supervisor waits for a spawned worker to connect
    /// to its control channel.
    pub startup_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            count: 5,
            run_dir: PathBuf::from("/tmp/prefork-proxy"),
            program: None,
            startup_timeout_secs: 5,
        }
    }
}

impl WorkerPoolConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

/// Upstream servers requests are forwarded to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream base URLs (e.g., "http://localhost:9000").
    pub servers: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            servers: vec!["http://localhost:9000".to_string()],
        }
    }
}

/// Timeout configuration for upstream and client I/O.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream request write + response read timeout in seconds.
    pub request_secs: u64,

    /// Time allowed for a client to deliver its complete request, in seconds.
    pub client_read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            client_read_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn client_read(&self) -> Duration {
        Duration::from_secs(self.client_read_secs)
    }
}

/// Size limits applied to every exchange.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of a client request (head and body) in bytes.
    pub max_request_bytes: usize,

    /// Maximum size of a buffered upstream response in bytes.
    pub max_response_bytes: usize,

    /// Maximum number of headers in a request or response head.
    pub max_headers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 1024 * 1024,        // 1MB
            max_response_bytes: 16 * 1024 * 1024, // 16MB
            max_headers: 64,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
