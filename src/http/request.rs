//! Request parsing and rewriting.
//!
//! # Responsibilities
//! - Recognize a complete HTTP/1.1 request (head and body) in a byte buffer
//! - Convert an absolute-form request target to origin-form
//! - Serialize the request for the upstream without the `Connection` header
//!
//! # Design Decisions
//! - The request target and body are forwarded byte-for-byte; only the
//!   request line form and the `Host`/`Connection` headers are touched
//! - CONNECT and authority-form targets are rejected

use bytes::{Bytes, BytesMut};

use super::body::BodyFraming;
use super::ParseError;
use crate::load_balancer::Upstream;

/// A parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Request target exactly as received.
    pub target: String,
    /// Origin-form of the target (`/path?query` or `*`).
    pub path: String,
    /// Authority carried by an absolute-form target.
    pub target_authority: Option<String>,
    /// HTTP/1.x minor version.
    pub minor_version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
    pub framing: BodyFraming,
}

impl RequestHead {
    /// First value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}

/// A complete client request.
#[derive(Debug, Clone)]
pub struct Request {
    pub head: RequestHead,
    /// Raw body bytes, still in their transfer coding.
    pub body: Bytes,
}

impl Request {
    /// Take one complete request off the front of `buf`.
    ///
    /// Returns `Ok(None)` while the head or body is still incomplete; `buf`
    /// is left untouched in that case.
    pub fn take_from(buf: &mut BytesMut, max_headers: usize) -> Result<Option<Self>, ParseError> {
        let (head, head_len) = match parse_head(&buf[..], max_headers)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        let body_len = match head.framing.body_len(&buf[head_len..])? {
            Some(len) => len,
            None => return Ok(None),
        };

        let mut raw = buf.split_to(head_len + body_len);
        let body = raw.split_off(head_len).freeze();
        Ok(Some(Self { head, body }))
    }

    /// Serialize the request for forwarding to `upstream`.
    ///
    /// The request line is rewritten to origin-form and `Connection` is
    /// dropped. `Host` becomes the absolute-form authority when there is one,
    /// otherwise the client's `Host` is kept, falling back to the upstream.
    pub fn to_upstream_bytes(&self, upstream: &Upstream) -> Vec<u8> {
        let head = &self.head;
        let host: &[u8] = head
            .target_authority
            .as_deref()
            .map(str::as_bytes)
            .or_else(|| head.header("host"))
            .unwrap_or_else(|| upstream.authority().as_bytes());

        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(head.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(head.path.as_bytes());
        out.extend_from_slice(format!(" HTTP/1.{}\r\n", head.minor_version).as_bytes());

        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(host);
        out.extend_from_slice(b"\r\n");

        for (name, value) in &head.headers {
            if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("host") {
                continue;
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn parse_head(buf: &[u8], max_headers: usize) -> Result<Option<(RequestHead, usize)>, ParseError> {
    let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    // httparse guarantees these are set on a complete parse.
    let method = req.method.unwrap_or_default().to_string();
    let target = req.path.unwrap_or_default().to_string();
    let minor_version = req.version.unwrap_or(1);

    if method.eq_ignore_ascii_case("CONNECT") {
        return Err(ParseError::UnsupportedTarget(target));
    }
    let (path, target_authority) = origin_form(&target)?;
    let framing = BodyFraming::from_headers(req.headers, BodyFraming::Empty)?;

    let headers = req
        .headers
        .iter()
        .map(|h| (h.name.to_string(), h.value.to_vec()))
        .collect();

    Ok(Some((
        RequestHead {
            method,
            target,
            path,
            target_authority,
            minor_version,
            headers,
            framing,
        },
        head_len,
    )))
}

/// Split a request target into its origin-form and, for absolute-form
/// targets, the authority it named.
fn origin_form(target: &str) -> Result<(String, Option<String>), ParseError> {
    if target.starts_with('/') || target == "*" {
        return Ok((target.to_string(), None));
    }

    let rest = strip_scheme(target).ok_or_else(|| ParseError::UnsupportedTarget(target.to_string()))?;
    let split = rest.find(|c| c == '/' || c == '?').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(split);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    if authority.is_empty() {
        return Err(ParseError::UnsupportedTarget(target.to_string()));
    }

    let path = if tail.is_empty() {
        "/".to_string()
    } else if tail.starts_with('?') {
        format!("/{}", tail)
    } else {
        tail.to_string()
    };
    Ok((path, Some(authority.to_string())))
}

fn strip_scheme(target: &str) -> Option<&str> {
    ["http://", "https://"].iter().find_map(|scheme| {
        target
            .get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| &target[scheme.len()..])
    })
}
