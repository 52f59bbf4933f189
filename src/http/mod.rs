//! HTTP/1.1 codec for the forwarding path.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → request.rs (parse head, measure body, origin-form rewrite)
//!     → upstream bytes
//! upstream bytes
//!     → response.rs (find the end of the response)
//!     → relayed verbatim to the client
//! ```
//!
//! body.rs holds the Content-Length / chunked / until-close framing shared by
//! both directions.

pub mod body;
pub mod request;
pub mod response;

pub use body::BodyFraming;
pub use request::{Request, RequestHead};
pub use response::{scan_response, ResponseScan};

/// A message that could not be parsed as HTTP/1.1.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed message: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("invalid Content-Length")]
    ContentLength,
    #[error("unsupported Transfer-Encoding")]
    TransferEncoding,
    #[error("both Content-Length and Transfer-Encoding present")]
    AmbiguousLength,
    #[error("invalid chunk size")]
    ChunkSize,
    #[error("chunk data not terminated by CRLF")]
    ChunkFraming,
    #[error("unsupported request target `{0}`")]
    UnsupportedTarget(String),
}
