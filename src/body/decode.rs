//! The request body reader and its decoder chain.
//!
//! The chain is assembled once per request from the parsed framing
//! headers: a wall-clock guard (when `max_request_time` is configured),
//! then either an exact `Content-Length` limiter, a chunked decoder capped
//! at `max_request_size`, or a zero-length source. The reader stays the
//! same object for the life of the request.

use std::cmp;
use std::future::poll_fn;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};

use crate::proto::h1::Buffered;
use crate::Error;

/// Streaming access to the request body, already de-framed.
///
/// `read` returns `Ok(0)` at the end of the body; the transport is left
/// aligned on the next message boundary.
pub struct BodyReader {
    kind: BodyKind,
    created: Instant,
    max_time: Duration,
}

pub(crate) enum BodyKind {
    H1 {
        io: Buffered,
        decoder: Decoder,
    },
    H2 {
        recv: h2::RecvStream,
        buf: Bytes,
        read: u64,
        cap: u64,
    },
    Buffered {
        data: Bytes,
    },
    Empty,
}

impl BodyReader {
    pub(crate) fn h1(io: Buffered, decoder: Decoder, created: Instant, max_time: Duration) -> Self {
        BodyReader {
            kind: BodyKind::H1 { io, decoder },
            created,
            max_time,
        }
    }

    pub(crate) fn h2(recv: h2::RecvStream, cap: u64, created: Instant, max_time: Duration) -> Self {
        BodyReader {
            kind: BodyKind::H2 {
                recv,
                buf: Bytes::new(),
                read: 0,
                cap,
            },
            created,
            max_time,
        }
    }

    pub(crate) fn buffered(data: Bytes) -> Self {
        BodyReader {
            kind: BodyKind::Buffered { data },
            created: Instant::now(),
            max_time: Duration::ZERO,
        }
    }

    pub(crate) fn empty() -> Self {
        BodyReader {
            kind: BodyKind::Empty,
            created: Instant::now(),
            max_time: Duration::ZERO,
        }
    }

    /// Reads the next decoded bytes into `dst`. Returns `Ok(0)` at the end
    /// of the body.
    pub async fn read(&mut self, dst: &mut [u8]) -> crate::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.max_time > Duration::ZERO {
            let remaining = self
                .max_time
                .checked_sub(self.created.elapsed())
                .ok_or_else(Error::new_timeout)?;
            match tokio::time::timeout(remaining, read_kind(&mut self.kind, dst)).await {
                Ok(result) => result,
                Err(_) => Err(Error::new_timeout()),
            }
        } else {
            read_kind(&mut self.kind, dst).await
        }
    }

    /// Reads the whole remaining body, failing with a 413-class error if it
    /// exceeds `limit`.
    pub async fn read_to_end(&mut self, limit: u64) -> crate::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut scratch = [0u8; 8 * 1024];
        loop {
            let n = self.read(&mut scratch).await?;
            if n == 0 {
                return Ok(out);
            }
            if out.len() as u64 + n as u64 > limit {
                return Err(Error::new_too_large());
            }
            out.extend_from_slice(&scratch[..n]);
        }
    }

    /// Discards the remaining body so the transport is left aligned.
    pub(crate) async fn drain(&mut self) -> crate::Result<()> {
        let mut scratch = [0u8; 8 * 1024];
        while self.read(&mut scratch).await? > 0 {}
        Ok(())
    }

    /// Blocks until the peer closes the connection or the timeout elapses.
    /// Returns `true` if the peer closed. Any bytes received while waiting
    /// are discarded.
    pub async fn wait_for_close(&mut self, timeout: Duration) -> bool {
        match self.kind {
            BodyKind::H1 { ref mut io, .. } => {
                let deadline = Instant::now() + timeout;
                loop {
                    io.buffer().clear();
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return false;
                    };
                    if remaining.is_zero() {
                        return false;
                    }
                    match tokio::time::timeout(remaining, io.fill_buf()).await {
                        Ok(Ok(0)) | Ok(Err(_)) => return true,
                        Ok(Ok(_)) => continue,
                        Err(_) => return false,
                    }
                }
            }
            _ => {
                tokio::time::sleep(timeout).await;
                false
            }
        }
    }

    pub(crate) fn into_kind(self) -> BodyKind {
        self.kind
    }
}

impl std::fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            BodyKind::H1 { .. } => "h1",
            BodyKind::H2 { .. } => "h2",
            BodyKind::Buffered { .. } => "buffered",
            BodyKind::Empty => "empty",
        };
        f.debug_struct("BodyReader").field("kind", &kind).finish()
    }
}

async fn read_kind(kind: &mut BodyKind, dst: &mut [u8]) -> crate::Result<usize> {
    match kind {
        BodyKind::Empty => Ok(0),
        BodyKind::Buffered { data } => {
            let n = cmp::min(data.len(), dst.len());
            dst[..n].copy_from_slice(&data[..n]);
            data.advance(n);
            Ok(n)
        }
        BodyKind::H1 { io, decoder } => decoder.decode(io, dst).await,
        BodyKind::H2 {
            recv,
            buf,
            read,
            cap,
        } => loop {
            if !buf.is_empty() {
                let allowed = cap.saturating_sub(*read);
                if allowed == 0 {
                    return Err(Error::new_too_large());
                }
                let n = cmp::min(cmp::min(buf.len() as u64, dst.len() as u64), allowed) as usize;
                dst[..n].copy_from_slice(&buf[..n]);
                buf.advance(n);
                *read += n as u64;
                let _ = recv.flow_control().release_capacity(n);
                return Ok(n);
            }
            match poll_fn(|cx| recv.poll_data(cx)).await {
                Some(Ok(data)) => *buf = data,
                Some(Err(e)) => return Err(Error::new_h2(e)),
                None => return Ok(0),
            }
        },
    }
}

// ===== h1 decoder =====

/// De-frames an HTTP/1 message body.
#[derive(Debug)]
pub(crate) struct Decoder {
    kind: DecodeKind,
}

#[derive(Debug)]
enum DecodeKind {
    /// Exactly this many bytes remain.
    Length(u64),
    Chunked(Chunked),
    Empty,
}

impl Decoder {
    pub(crate) fn length(len: u64) -> Self {
        Decoder {
            kind: DecodeKind::Length(len),
        }
    }

    pub(crate) fn chunked(cap: u64) -> Self {
        Decoder {
            kind: DecodeKind::Chunked(Chunked {
                state: ChunkedState::Start,
                size: 0,
                read: 0,
                cap,
            }),
        }
    }

    pub(crate) fn empty() -> Self {
        Decoder {
            kind: DecodeKind::Empty,
        }
    }

    async fn decode(&mut self, io: &mut Buffered, dst: &mut [u8]) -> crate::Result<usize> {
        match self.kind {
            DecodeKind::Empty => Ok(0),
            DecodeKind::Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Ok(0);
                }
                if !io.has_buffered() && io.fill_buf().await.map_err(Error::new_io)? == 0 {
                    return Err(Error::new_incomplete());
                }
                let buf = io.buffer();
                let n =
                    cmp::min(cmp::min(*remaining, dst.len() as u64), buf.len() as u64) as usize;
                dst[..n].copy_from_slice(&buf[..n]);
                buf.advance(n);
                *remaining -= n as u64;
                Ok(n)
            }
            DecodeKind::Chunked(ref mut chunked) => chunked.decode(io, dst).await,
        }
    }
}

#[derive(Debug)]
struct Chunked {
    state: ChunkedState,
    /// Bytes left in the current chunk.
    size: u64,
    /// Total decoded bytes so far.
    read: u64,
    /// Decoded-size cap; the first byte past it fails with a 413-class
    /// error.
    cap: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkedState {
    /// Expecting the first hex digit of a chunk size.
    Start,
    Size,
    Ext,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    TrailerStart,
    TrailerField,
    TrailerFieldLf,
    EndLf,
    End,
}

impl Chunked {
    async fn decode(&mut self, io: &mut Buffered, dst: &mut [u8]) -> crate::Result<usize> {
        use ChunkedState::*;

        loop {
            if self.state == End {
                return Ok(0);
            }

            if !io.has_buffered() && io.fill_buf().await.map_err(Error::new_io)? == 0 {
                return Err(Error::new_incomplete());
            }

            if self.state == Body {
                let allowed = self.cap.saturating_sub(self.read);
                if allowed == 0 {
                    return Err(Error::new_too_large());
                }
                let buf = io.buffer();
                let n = cmp::min(
                    cmp::min(self.size, dst.len() as u64),
                    cmp::min(buf.len() as u64, allowed),
                ) as usize;
                dst[..n].copy_from_slice(&buf[..n]);
                buf.advance(n);
                self.size -= n as u64;
                self.read += n as u64;
                if self.size == 0 {
                    self.state = BodyCr;
                }
                return Ok(n);
            }

            let byte = io.buffer()[0];
            io.buffer().advance(1);

            self.state = match self.state {
                Start | Size => match byte {
                    b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                        let digit = (byte as char).to_digit(16).unwrap() as u64;
                        self.size = self
                            .size
                            .checked_mul(16)
                            .and_then(|s| s.checked_add(digit))
                            .ok_or_else(Error::new_too_large)?;
                        Size
                    }
                    b';' if self.state == Size => Ext,
                    b'\r' if self.state == Size => SizeLf,
                    _ => return Err(chunk_err()),
                },
                Ext => match byte {
                    b'\r' => SizeLf,
                    _ => Ext,
                },
                SizeLf => match byte {
                    b'\n' if self.size == 0 => TrailerStart,
                    b'\n' => Body,
                    _ => return Err(chunk_err()),
                },
                BodyCr => match byte {
                    b'\r' => BodyLf,
                    _ => return Err(chunk_err()),
                },
                BodyLf => match byte {
                    b'\n' => {
                        self.size = 0;
                        Start
                    }
                    _ => return Err(chunk_err()),
                },
                TrailerStart => match byte {
                    b'\r' => EndLf,
                    _ => TrailerField,
                },
                TrailerField => match byte {
                    b'\r' => TrailerFieldLf,
                    _ => TrailerField,
                },
                TrailerFieldLf => match byte {
                    b'\n' => TrailerStart,
                    _ => return Err(chunk_err()),
                },
                EndLf => match byte {
                    b'\n' => End,
                    _ => return Err(chunk_err()),
                },
                Body | End => unreachable!("handled above"),
            };
        }
    }
}

fn chunk_err() -> Error {
    Error::new_parse(crate::error::Parse::TransferEncoding)
}
