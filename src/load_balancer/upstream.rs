//! Upstream server abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server parsed from its base URL
//! - Rotate a worker's exchanges across the configured upstreams

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::config::UpstreamConfig;
use crate::load_balancer::round_robin::RoundRobin;

/// Error type for upstream definitions.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream url `{url}`: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("upstream url `{0}` must be http://host[:port]")]
    Unsupported(String),
    #[error("no upstream servers configured")]
    Empty,
}

/// A single upstream HTTP/1.1 server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    host: String,
    port: u16,
    /// `host:port`, used for dialing and as the Host header fallback.
    authority: String,
}

impl Upstream {
    /// Parse an `http://host[:port]` base URL.
    pub fn parse(raw: &str) -> Result<Self, UpstreamError> {
        let url = Url::parse(raw).map_err(|source| UpstreamError::Url {
            url: raw.to_string(),
            source,
        })?;
        if url.scheme() != "http" {
            return Err(UpstreamError::Unsupported(raw.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| UpstreamError::Unsupported(raw.to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| UpstreamError::Unsupported(raw.to_string()))?;

        let authority = format!("{}:{}", host, port);
        Ok(Self {
            host,
            port,
            authority,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}", self.authority)
    }
}

/// The upstreams one worker forwards to, selected round-robin per exchange.
#[derive(Debug)]
pub struct UpstreamPool {
    upstreams: Vec<Arc<Upstream>>,
    rotation: RoundRobin,
}

impl UpstreamPool {
    pub fn new(upstreams: Vec<Upstream>) -> Result<Self, UpstreamError> {
        if upstreams.is_empty() {
            return Err(UpstreamError::Empty);
        }
        let rotation = RoundRobin::new(upstreams.len());
        Ok(Self {
            upstreams: upstreams.into_iter().map(Arc::new).collect(),
            rotation,
        })
    }

    /// Build the pool from configuration.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let upstreams = config
            .servers
            .iter()
            .map(|raw| Upstream::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(upstreams)
    }

    /// Upstream for the next exchange.
    pub fn next(&mut self) -> Arc<Upstream> {
        // The pool is never empty, so the rotation always yields an index.
        let index = self.rotation.next_index().unwrap_or(0);
        Arc::clone(&self.upstreams[index])
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
