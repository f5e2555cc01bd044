//! Buffered read side of an HTTP/1 connection.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, ReadHalf};

use crate::common::Io;
use crate::proto::h1::parse::{self, RequestHead};

const INIT_BUFFER_SIZE: usize = 8 * 1024;

/// The read half of a connection plus the bytes read past the last parsed
/// message. Body decoders consume from the buffer first; whatever remains
/// after a request belongs to the next one (or to the protocol taking over
/// after an upgrade).
pub(crate) struct Buffered {
    io: ReadHalf<Io>,
    buf: BytesMut,
}

impl std::fmt::Debug for Buffered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffered")
            .field("buffered", &self.buf.len())
            .finish()
    }
}

impl Buffered {
    pub(crate) fn new(io: ReadHalf<Io>) -> Self {
        Buffered {
            io,
            buf: BytesMut::with_capacity(INIT_BUFFER_SIZE),
        }
    }

    pub(crate) fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub(crate) fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Reads more bytes from the transport into the buffer. Returns the
    /// number of bytes read; 0 means EOF.
    pub(crate) async fn fill_buf(&mut self) -> std::io::Result<usize> {
        self.io.read_buf(&mut self.buf).await
    }

    /// Reads one request head, filling the buffer as needed.
    ///
    /// `Ok(None)` means the peer closed cleanly between requests.
    pub(crate) async fn read_head(
        &mut self,
        max_head: usize,
    ) -> crate::Result<Option<RequestHead>> {
        loop {
            if !self.buf.is_empty() {
                if let Some(head) = parse::parse_request_head(&mut self.buf, max_head)? {
                    return Ok(Some(head));
                }
            }
            if self.fill_buf().await.map_err(crate::Error::new_io)? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(crate::Error::new_incomplete())
                };
            }
        }
    }

    /// Waits up to `timeout` for request bytes between keep-alive
    /// iterations. `Ok(false)` means the idle wait elapsed or the peer
    /// closed; either way the connection is done.
    pub(crate) async fn wait_for_data(&mut self, timeout: Duration) -> bool {
        if self.has_buffered() {
            return true;
        }
        match tokio::time::timeout(timeout, self.fill_buf()).await {
            Ok(Ok(n)) => n > 0,
            Ok(Err(_)) | Err(_) => false,
        }
    }

    pub(crate) fn into_parts(self) -> (ReadHalf<Io>, BytesMut) {
        (self.io, self.buf)
    }
}
