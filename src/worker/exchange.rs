//! One proxied exchange: client request in, upstream response out.
//!
//! # Steps
//! ```text
//! read request (until complete, bounded)  → parse failure: close, no response
//! rewrite for upstream (origin-form, no Connection header)
//! dial upstream (fresh connection)         → failure: close, no response
//! write request / read full response       → failure: close, no response
//! write response verbatim to client
//! close client
//! ```
//!
//! The client stream is owned by the exchange and dropped when it returns,
//! so each client descriptor is closed exactly once whatever the outcome.

use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ProxyConfig;
use crate::http::{scan_response, ParseError, Request, ResponseScan};
use crate::load_balancer::Upstream;
use crate::resilience::{with_timeout, Stage, TimeoutError};

const INITIAL_BUFFER: usize = 4096;

/// Limits and deadlines applied to every exchange of a worker.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub client_read_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_request_bytes: usize,
    pub max_response_bytes: usize,
    pub max_headers: usize,
}

impl ExchangeSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            client_read_timeout: config.timeouts.client_read(),
            connect_timeout: config.timeouts.connect(),
            request_timeout: config.timeouts.request(),
            max_request_bytes: config.limits.max_request_bytes,
            max_response_bytes: config.limits.max_response_bytes,
            max_headers: config.limits.max_headers,
        }
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Why an exchange was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("client closed the connection without sending a request")]
    ClientClosed,
    #[error("client closed the connection mid-request")]
    IncompleteRequest,
    #[error("client read failed: {0}")]
    ClientRead(#[source] io::Error),
    #[error("request exceeds {0} bytes")]
    RequestTooLarge(usize),
    #[error("bad request: {0}")]
    BadRequest(#[from] ParseError),
    #[error("connect to {upstream} failed: {source}")]
    Connect {
        upstream: String,
        #[source]
        source: io::Error,
    },
    #[error("upstream write failed: {0}")]
    UpstreamWrite(#[source] io::Error),
    #[error("upstream read failed: {0}")]
    UpstreamRead(#[source] io::Error),
    #[error("upstream closed before the response was complete")]
    UpstreamClosed,
    #[error("bad upstream response: {0}")]
    BadResponse(#[source] ParseError),
    #[error("response exceeds {0} bytes")]
    ResponseTooLarge(usize),
    #[error("client write failed: {0}")]
    ClientWrite(#[source] io::Error),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl ExchangeError {
    /// Whether the client is to blame rather than the upstream or the proxy.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            ExchangeError::ClientClosed
                | ExchangeError::IncompleteRequest
                | ExchangeError::ClientRead(_)
                | ExchangeError::RequestTooLarge(_)
                | ExchangeError::BadRequest(_)
                | ExchangeError::ClientWrite(_)
        ) || matches!(self, ExchangeError::Timeout(t) if t.stage == Stage::ClientRead)
    }
}

/// What a completed exchange did.
#[derive(Debug, Clone)]
pub struct ExchangeSummary {
    pub method: String,
    pub path: String,
    pub upstream: String,
    pub status: u16,
    pub request_bytes: usize,
    pub response_bytes: usize,
    pub elapsed: Duration,
}

/// Run one exchange on `client`, forwarding to `upstream`.
pub async fn forward<S>(
    client: &mut S,
    upstream: &Upstream,
    settings: &ExchangeSettings,
) -> Result<ExchangeSummary, ExchangeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();

    let request = with_timeout(
        Stage::ClientRead,
        settings.client_read_timeout,
        read_request(client, settings),
    )
    .await??;
    let outbound = request.to_upstream_bytes(upstream);

    let mut upstream_stream = with_timeout(
        Stage::UpstreamConnect,
        settings.connect_timeout,
        TcpStream::connect(upstream.authority()),
    )
    .await?
    .map_err(|source| ExchangeError::Connect {
        upstream: upstream.to_string(),
        source,
    })?;

    let (status, response) = with_timeout(Stage::UpstreamExchange, settings.request_timeout, async {
        upstream_stream
            .write_all(&outbound)
            .await
            .map_err(ExchangeError::UpstreamWrite)?;
        read_response(&mut upstream_stream, request.head.is_head(), settings).await
    })
    .await??;
    drop(upstream_stream);

    client
        .write_all(&response)
        .await
        .map_err(ExchangeError::ClientWrite)?;
    client.shutdown().await.map_err(ExchangeError::ClientWrite)?;

    Ok(ExchangeSummary {
        method: request.head.method,
        path: request.head.path,
        upstream: upstream.to_string(),
        status,
        request_bytes: outbound.len(),
        response_bytes: response.len(),
        elapsed: started.elapsed(),
    })
}

/// Accumulate client bytes until one complete request is buffered.
///
/// At most one byte past `max_request_bytes` is ever read, and a request
/// longer than the limit is rejected even when it arrives in a single read.
async fn read_request<S>(client: &mut S, settings: &ExchangeSettings) -> Result<Request, ExchangeError>
where
    S: AsyncRead + Unpin,
{
    let limit = settings.max_request_bytes;
    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER.min(limit.saturating_add(1)));
    loop {
        let buffered = buf.len();
        if let Some(request) = Request::take_from(&mut buf, settings.max_headers)? {
            if buffered - buf.len() > limit {
                return Err(ExchangeError::RequestTooLarge(limit));
            }
            return Ok(request);
        }
        if buffered >= limit {
            return Err(ExchangeError::RequestTooLarge(limit));
        }
        let allowance = (limit - buffered).saturating_add(1) as u64;
        let n = (&mut *client)
            .take(allowance)
            .read_buf(&mut buf)
            .await
            .map_err(ExchangeError::ClientRead)?;
        if n == 0 {
            return Err(if buf.is_empty() {
                ExchangeError::ClientClosed
            } else {
                ExchangeError::IncompleteRequest
            });
        }
    }
}

/// Read the complete upstream response, returning its status and raw bytes.
async fn read_response<S>(
    upstream: &mut S,
    head_request: bool,
    settings: &ExchangeSettings,
) -> Result<(u16, Bytes), ExchangeError>
where
    S: AsyncRead + Unpin,
{
    let limit = settings.max_response_bytes;
    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER);
    loop {
        let n = upstream
            .read_buf(&mut buf)
            .await
            .map_err(ExchangeError::UpstreamRead)?;

        let scan = scan_response(&buf, head_request, settings.max_headers)
            .map_err(ExchangeError::BadResponse)?;
        let len = match scan {
            ResponseScan::Complete { len, .. } => len,
            _ => buf.len(),
        };
        if len > limit {
            return Err(ExchangeError::ResponseTooLarge(limit));
        }

        match scan {
            ResponseScan::Complete { status, len } => {
                buf.truncate(len);
                return Ok((status, buf.freeze()));
            }
            ResponseScan::UntilClose { status } if n == 0 => return Ok((status, buf.freeze())),
            _ if n == 0 => return Err(ExchangeError::UpstreamClosed),
            _ => {}
        }
    }
}
