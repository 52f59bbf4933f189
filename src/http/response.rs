//! Upstream response framing.
//!
//! # Responsibilities
//! - Find where a complete upstream response ends in a byte buffer
//! - Skip over interim (1xx) responses, which are relayed with the final one
//!
//! # Design Decisions
//! - Responses are relayed verbatim; nothing here rewrites bytes
//! - No body for HEAD requests or 1xx/204/304 statuses
//! - Without Content-Length or chunked coding the body runs until close

use super::body::BodyFraming;
use super::ParseError;

/// Outcome of scanning a buffered upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseScan {
    /// More bytes are needed.
    Incomplete,
    /// The response ends after `len` bytes.
    Complete { status: u16, len: usize },
    /// The head is complete and the body is delimited by connection close.
    UntilClose { status: u16 },
}

/// Scan `buf` for a complete response. `head_request` marks a response to
/// HEAD, which never carries a body.
pub fn scan_response(
    buf: &[u8],
    head_request: bool,
    max_headers: usize,
) -> Result<ResponseScan, ParseError> {
    let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut start = 0;

    loop {
        let mut res = httparse::Response::new(&mut headers);
        let head_len = match res.parse(&buf[start..])? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(ResponseScan::Incomplete),
        };
        let status = res.code.unwrap_or_default();
        let body_start = start + head_len;

        if (100..200).contains(&status) && status != 101 {
            start = body_start;
            continue;
        }

        let framing = if head_request
            || (100..200).contains(&status)
            || status == 204
            || status == 304
        {
            BodyFraming::Empty
        } else {
            BodyFraming::from_headers(res.headers, BodyFraming::UntilClose)?
        };

        if framing == BodyFraming::UntilClose {
            return Ok(ResponseScan::UntilClose { status });
        }
        return Ok(match framing.body_len(&buf[body_start..])? {
            Some(body_len) => ResponseScan::Complete {
                status,
                len: body_start + body_len,
            },
            None => ResponseScan::Incomplete,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
        assert_eq!(
            scan_response(raw, false, 16),
            Ok(ResponseScan::Complete { status: 200, len: raw.len() })
        );
        assert_eq!(
            scan_response(&raw[..raw.len() - 1], false, 16),
            Ok(ResponseScan::Incomplete)
        );
    }

    #[test]
    fn chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nOK\r\n0\r\n\r\n";
        assert_eq!(
            scan_response(raw, false, 16),
            Ok(ResponseScan::Complete { status: 200, len: raw.len() })
        );
    }

    #[test]
    fn bodiless_responses() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 120\r\n\r\n";
        assert_eq!(
            scan_response(head, true, 16),
            Ok(ResponseScan::Complete { status: 200, len: head.len() })
        );

        let no_content = b"HTTP/1.1 204 No Content\r\n\r\n";
        assert_eq!(
            scan_response(no_content, false, 16),
            Ok(ResponseScan::Complete { status: 204, len: no_content.len() })
        );
    }

    #[test]
    fn interim_response_relayed_with_final() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(
            scan_response(raw, false, 16),
            Ok(ResponseScan::Complete { status: 201, len: raw.len() })
        );
        assert_eq!(
            scan_response(b"HTTP/1.1 100 Continue\r\n\r\n", false, 16),
            Ok(ResponseScan::Incomplete)
        );
    }

    #[test]
    fn unframed_body_runs_until_close() {
        let raw = b"HTTP/1.0 200 OK\r\nServer: old\r\n\r\npartial body";
        assert_eq!(
            scan_response(raw, false, 16),
            Ok(ResponseScan::UntilClose { status: 200 })
        );
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            scan_response(b"SSH-2.0-OpenSSH\r\n\r\n", false, 16),
            Err(ParseError::Malformed(_))
        ));
    }
}
