//! Header parsing and manipulation helpers shared by the protocol layers.

use http::header::{HeaderValue, CONNECTION, TE, TRANSFER_ENCODING, UPGRADE};
use http::HeaderMap;

/// A response content coding negotiated from `Accept-Encoding`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContentCoding {
    Gzip,
    Deflate,
}

impl ContentCoding {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
        }
    }
}

pub(crate) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

pub(crate) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

pub(crate) fn connection_upgrade(value: &HeaderValue) -> bool {
    connection_has(value, "upgrade")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

pub(crate) fn content_length_parse(value: &HeaderValue) -> Option<u64> {
    from_digits(value.as_bytes())
}

fn from_digits(bytes: &[u8]) -> Option<u64> {
    // cannot use FromStr for u64, since it allows a signed prefix
    let mut result = 0u64;
    const RADIX: u64 = 10;

    if bytes.is_empty() {
        return None;
    }

    for &b in bytes {
        match b {
            b'0'..=b'9' => {
                result = result.checked_mul(RADIX)?;
                result = result.checked_add((b - b'0') as u64)?;
            }
            _ => {
                // not a DIGIT, get outta here!
                return None;
            }
        }
    }

    Some(result)
}

pub(crate) fn transfer_encoding_is_chunked(value: &HeaderValue) -> bool {
    // chunked must always be the last encoding, according to spec
    if let Ok(s) = value.to_str() {
        if let Some(encoding) = s.rsplit(',').next() {
            return encoding.trim().eq_ignore_ascii_case("chunked");
        }
    }

    false
}

/// Splits a `Host` header value into host name and optional explicit port.
///
/// Handles the bracketed IPv6 literal form; the host part is lowercased for
/// case-insensitive virtual-host matching.
pub(crate) fn parse_host(value: &HeaderValue) -> Option<(String, Option<u16>)> {
    let s = value.to_str().ok()?.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(rest) = s.strip_prefix('[') {
        // "[::1]" or "[::1]:8080"
        let end = rest.find(']')?;
        let host = rest[..end].to_ascii_lowercase();
        let port = match &rest[end + 1..] {
            "" => None,
            p => Some(p.strip_prefix(':')?.parse().ok()?),
        };
        return Some((host, port));
    }
    match s.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            Some((host.to_ascii_lowercase(), Some(port.parse().ok()?)))
        }
        _ => Some((s.to_ascii_lowercase(), None)),
    }
}

/// Picks a response content coding from `Accept-Encoding`, scanning tokens
/// left-to-right so the first supported coding in *client* order wins.
///
/// Codings with an explicit `q=0` are skipped; anything that is neither
/// `gzip` nor `deflate` is ignored.
pub(crate) fn accept_encoding_preference(headers: &HeaderMap) -> Option<ContentCoding> {
    let value = headers.get(http::header::ACCEPT_ENCODING)?;
    let s = value.to_str().ok()?;
    for part in s.split(',') {
        let mut pieces = part.trim().split(';');
        let coding = pieces.next().unwrap_or("").trim();
        let refused = pieces.any(|p| {
            let p = p.trim();
            p.eq_ignore_ascii_case("q=0") || p.eq_ignore_ascii_case("q=0.0")
        });
        if refused {
            continue;
        }
        if coding.eq_ignore_ascii_case("gzip") {
            return Some(ContentCoding::Gzip);
        }
        if coding.eq_ignore_ascii_case("deflate") {
            return Some(ContentCoding::Deflate);
        }
    }
    None
}

/// Removes connection-level headers before a message head crosses into
/// HTTP/2, where that information lives in frame types instead.
pub(crate) fn strip_connection_headers(headers: &mut HeaderMap) {
    if let Some(header) = headers.remove(CONNECTION) {
        warn!("Connection header illegal in HTTP/2");
        if let Ok(contents) = header.to_str() {
            for name in contents.split(',') {
                let name = name.trim();
                if !name.is_empty() {
                    headers.remove(name);
                }
            }
        }
    }
    for header in [UPGRADE, TRANSFER_ENCODING, TE] {
        headers.remove(header);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
