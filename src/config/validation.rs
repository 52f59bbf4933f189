//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (worker count, timeouts, limits > 0)
//! - Check that every upstream is a dialable `http://host:port` URL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),
    #[error("workers.count must be at least 1")]
    NoWorkers,
    #[error("upstream.servers must name at least one server")]
    NoUpstreams,
    #[error("upstream `{url}` is invalid: {reason}")]
    Upstream { url: String, reason: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Validate a parsed configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.workers.count == 0 {
        errors.push(ValidationError::NoWorkers);
    }

    if config.upstream.servers.is_empty() {
        errors.push(ValidationError::NoUpstreams);
    }
    for server in &config.upstream.servers {
        if let Err(reason) = check_upstream(server) {
            errors.push(ValidationError::Upstream {
                url: server.clone(),
                reason,
            });
        }
    }

    let positive = [
        ("workers.startup_timeout_secs", config.workers.startup_timeout_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.client_read_secs", config.timeouts.client_read_secs),
        ("limits.max_request_bytes", config.limits.max_request_bytes as u64),
        ("limits.max_response_bytes", config.limits.max_response_bytes as u64),
        ("limits.max_headers", config.limits.max_headers as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upstream(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
