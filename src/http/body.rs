//! Message body framing.
//!
//! Bodies are never decoded, only measured: the proxy forwards request and
//! response bytes verbatim, so all it needs is where a message ends.

use httparse::Status;

use super::ParseError;

/// How the end of a message body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes follow the head.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Body runs until the peer closes the connection (responses only).
    UntilClose,
}

impl BodyFraming {
    /// Determine framing from a message's headers. `fallback` applies when
    /// neither Transfer-Encoding nor Content-Length is present.
    pub fn from_headers(
        headers: &[httparse::Header<'_>],
        fallback: BodyFraming,
    ) -> Result<Self, ParseError> {
        let mut chunked = false;
        let mut length: Option<usize> = None;

        for header in headers {
            if header.name.eq_ignore_ascii_case("transfer-encoding") {
                let value = std::str::from_utf8(header.value)
                    .map_err(|_| ParseError::TransferEncoding)?;
                let last = value.rsplit(',').next().unwrap_or("").trim();
                if !last.eq_ignore_ascii_case("chunked") {
                    // A response may delimit a non-chunked coding by closing.
                    return match fallback {
                        BodyFraming::UntilClose => Ok(BodyFraming::UntilClose),
                        _ => Err(ParseError::TransferEncoding),
                    };
                }
                chunked = true;
            } else if header.name.eq_ignore_ascii_case("content-length") {
                let parsed = std::str::from_utf8(header.value)
                    .ok()
                    .map(str::trim)
                    .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .ok_or(ParseError::ContentLength)?;
                match length {
                    Some(existing) if existing != parsed => {
                        return Err(ParseError::ContentLength)
                    }
                    _ => length = Some(parsed),
                }
            }
        }

        match (chunked, length) {
            (true, Some(_)) => Err(ParseError::AmbiguousLength),
            (true, None) => Ok(BodyFraming::Chunked),
            (false, Some(0)) => Ok(BodyFraming::Empty),
            (false, Some(n)) => Ok(BodyFraming::Length(n)),
            (false, None) => Ok(fallback),
        }
    }

    /// Length of the body at the start of `buf`, or `None` if more bytes are
    /// needed. `UntilClose` bodies are only complete at end of stream.
    pub fn body_len(&self, buf: &[u8]) -> Result<Option<usize>, ParseError> {
        match *self {
            BodyFraming::Empty => Ok(Some(0)),
            BodyFraming::Length(n) => Ok((buf.len() >= n).then_some(n)),
            BodyFraming::Chunked => chunked_len(buf),
            BodyFraming::UntilClose => Ok(None),
        }
    }
}

/// Scan a chunked body, trailers included.
fn chunked_len(buf: &[u8]) -> Result<Option<usize>, ParseError> {
    let mut pos = 0;
    loop {
        match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(Status::Complete((consumed, size))) => {
                pos += consumed;
                if size == 0 {
                    return Ok(trailer_end(&buf[pos..]).map(|n| pos + n));
                }
                let end = usize::try_from(size)
                    .ok()
                    .and_then(|size| pos.checked_add(size))
                    .and_then(|end| end.checked_add(2))
                    .ok_or(ParseError::ChunkSize)?;
                if buf.len() < end {
                    return Ok(None);
                }
                if &buf[end - 2..end] != b"\r\n" {
                    return Err(ParseError::ChunkFraming);
                }
                pos = end;
            }
            Ok(Status::Partial) => return Ok(None),
            Err(_) => return Err(ParseError::ChunkSize),
        }
    }
}

/// End of the trailer section: zero or more field lines and an empty line.
fn trailer_end(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    loop {
        let line = buf[pos..].windows(2).position(|w| w == b"\r\n")?;
        pos += line + 2;
        if line == 0 {
            return Some(pos);
        }
    }
}
