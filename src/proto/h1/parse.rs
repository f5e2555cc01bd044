//! HTTP/1.x head parsing and serialization.

use std::cmp;

use bytes::{Buf, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};

use crate::cookie::Cookie;
use crate::error::Parse;
use crate::Error;

/// Hard cap on a single request head line, independent of the configured
/// total head size.
pub(crate) const MAX_HEADER_LINE: usize = 4096;

const MAX_HEADERS: usize = 100;

/// A parsed request head.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: Method,
    /// The raw request-target, exactly as received.
    pub(crate) target: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
}

/// Tries to parse one request head from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. The limits are enforced
/// on the unparsed bytes as well, so an attacker cannot stall the
/// connection with an unbounded head.
pub(crate) fn parse_request_head(
    buf: &mut BytesMut,
    max_head: usize,
) -> crate::Result<Option<RequestHead>> {
    let end = match find_head_end(buf, max_head)? {
        Some(end) => end,
        None => return Ok(None),
    };
    if end > max_head {
        return Err(Error::new_parse(Parse::TooLarge));
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(&buf[..end])? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Err(Error::new_parse(Parse::Header)),
    };
    debug_assert_eq!(len, end);

    let method = Method::from_bytes(req.method.unwrap_or("").as_bytes())?;
    let target = req.path.unwrap_or("").to_string();
    if target.is_empty() {
        return Err(Error::new_parse(Parse::Uri));
    }
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Error::new_parse(Parse::Version)),
    };

    let mut header_map = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| Error::new_parse(Parse::Header))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| Error::new_parse(Parse::Header))?;
        header_map.append(name, value);
    }

    buf.advance(end);

    Ok(Some(RequestHead {
        method,
        target,
        version,
        headers: header_map,
    }))
}

/// Locates the `\r\n\r\n` closing the head, enforcing the per-line cap
/// along the way.
fn find_head_end(buf: &[u8], max_head: usize) -> crate::Result<Option<usize>> {
    let window = cmp::min(buf.len(), max_head.saturating_add(2));
    let mut line_start = 0;
    let mut i = 0;
    while i + 1 < window {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            let line_len = i - line_start;
            if line_len > MAX_HEADER_LINE {
                return Err(Error::new_parse(Parse::LineTooLong));
            }
            if line_len == 0 {
                if line_start == 0 {
                    // bare CRLF before any request line
                    return Err(Error::new_parse(Parse::Method));
                }
                return Ok(Some(i + 2));
            }
            line_start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    if buf.len() > max_head {
        return Err(Error::new_parse(Parse::TooLarge));
    }
    if buf.len() - line_start > MAX_HEADER_LINE + 1 {
        return Err(Error::new_parse(Parse::LineTooLong));
    }
    Ok(None)
}

/// Serializes a response head, `Set-Cookie` lines included.
pub(crate) fn encode_head(
    dst: &mut Vec<u8>,
    version: Version,
    status: StatusCode,
    phrase: Option<&str>,
    headers: &HeaderMap,
    cookies: &[Cookie],
) {
    dst.extend_from_slice(match version {
        Version::HTTP_10 => b"HTTP/1.0 ",
        _ => b"HTTP/1.1 ",
    });
    dst.extend_from_slice(status.as_str().as_bytes());
    dst.push(b' ');
    let phrase = phrase
        .or_else(|| status.canonical_reason())
        .unwrap_or("Unknown");
    dst.extend_from_slice(phrase.as_bytes());
    dst.extend_from_slice(b"\r\n");

    for (name, value) in headers.iter() {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    for cookie in cookies {
        dst.extend_from_slice(b"set-cookie: ");
        dst.extend_from_slice(cookie.render().as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &[u8]) -> crate::Result<Option<RequestHead>> {
        let mut buf = BytesMut::from(raw);
        parse_request_head(&mut buf, 10 * 1024)
    }

    #[test]
    fn parses_simple_get() {
        let head = parse(b"GET /index?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.target, "/index?x=1");
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.headers.get("host").unwrap(), "example.com");
    }

    #[test]
    fn leaves_body_bytes_in_buffer() {
        let mut buf = BytesMut::from(
            &b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello"[..],
        );
        let head = parse_request_head(&mut buf, 10 * 1024).unwrap().unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn incomplete_returns_none() {
        assert!(parse(b"GET / HTTP/1.1\r\nHost: exa").unwrap().is_none());
    }

    #[test]
    fn repeated_headers_accumulate() {
        let head = parse(b"GET / HTTP/1.1\r\nHost: h\r\nX-T: a\r\nX-T: b\r\n\r\n")
            .unwrap()
            .unwrap();
        let all: Vec<_> = head.headers.get_all("x-t").iter().collect();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn head_over_limit_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..600 {
            raw.extend_from_slice(format!("X-Pad-{i}: aaaaaaaaaaaaaaaa\r\n").as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        let err = parse(&raw).expect_err("too large");
        assert!(err.is_too_large());
    }

    #[test]
    fn long_line_rejected_before_terminator() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEADER_LINE + 10));
        // no CRLF yet; the partial line alone must trip the cap
        let err = parse(&raw).expect_err("line too long");
        assert!(err.is_too_large());
    }

    #[test]
    fn unsupported_version_rejected() {
        assert!(parse(b"GET / HTTP/2.0\r\n\r\n").is_err());
    }

    #[test]
    fn encode_head_round_trip_shape() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("2"));
        let mut dst = Vec::new();
        encode_head(
            &mut dst,
            Version::HTTP_11,
            StatusCode::OK,
            None,
            &headers,
            &[Cookie::new("sid", "1")],
        );
        let text = String::from_utf8(dst).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.contains("set-cookie: sid=1; Path=/\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn encode_head_phrase_override() {
        let mut dst = Vec::new();
        encode_head(
            &mut dst,
            Version::HTTP_11,
            StatusCode::IM_A_TEAPOT,
            Some("Kettle"),
            &HeaderMap::new(),
            &[],
        );
        assert!(dst.starts_with(b"HTTP/1.1 418 Kettle\r\n"));
    }
}
