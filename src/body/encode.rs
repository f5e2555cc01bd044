//! The response body writer and its encoder chain.
//!
//! Writes flow handler → compressor (optional) → chunked framer
//! (optional) → counting sink → transport. The counter observes every
//! body byte put on the wire, so `Content-Length` accounting and the
//! access log agree with what the peer saw.

use std::cmp;
use std::future::poll_fn;
use std::io::Write;

use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use h2::SendStream;
use tokio::io::{AsyncWriteExt, WriteHalf};

use crate::common::Io;
use crate::headers::ContentCoding;
use crate::Error;

/// Where encoded body bytes go.
pub(crate) enum Sink {
    /// The write half of an HTTP/1 transport.
    Io(WriteHalf<Io>),
    /// An HTTP/2 stream.
    H2(SendStream<Bytes>),
    /// In-memory capture, used by the test factories.
    Buffer(Vec<u8>),
    /// Discards everything; used for HEAD responses.
    Null,
}

impl Sink {
    async fn send(&mut self, data: &[u8]) -> crate::Result<()> {
        match self {
            Sink::Io(io) => io.write_all(data).await.map_err(Error::new_io),
            Sink::H2(stream) => h2_send(stream, Bytes::copy_from_slice(data)).await,
            Sink::Buffer(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            Sink::Null => Ok(()),
        }
    }
}

/// Streaming access to the response body, already framed and encoded.
///
/// Obtained from
/// [`ServerResponse::body_writer`][crate::ServerResponse::body_writer];
/// most handlers use the higher-level `write_body` family instead.
pub struct BodyWriter {
    sink: Sink,
    chunked: bool,
    compressor: Option<Compressor>,
    declared: Option<u64>,
    bytes_written: u64,
    finished: bool,
}

impl BodyWriter {
    pub(crate) fn new(
        sink: Sink,
        chunked: bool,
        coding: Option<ContentCoding>,
        declared: Option<u64>,
    ) -> Self {
        let compressor = coding.map(|coding| match coding {
            ContentCoding::Gzip => {
                Compressor::Gzip(GzEncoder::new(Vec::new(), Compression::default()))
            }
            ContentCoding::Deflate => {
                Compressor::Deflate(ZlibEncoder::new(Vec::new(), Compression::default()))
            }
        });
        BodyWriter {
            sink,
            chunked,
            compressor,
            declared,
            bytes_written: 0,
            finished: false,
        }
    }

    /// Body bytes put on the wire so far, chunk framing included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Writes body bytes through the encoder chain.
    pub async fn write(&mut self, data: &[u8]) -> crate::Result<()> {
        if self.finished {
            return Err(Error::new_user_unexpected_body());
        }
        if data.is_empty() {
            return Ok(());
        }
        match self.compressor {
            Some(ref mut compressor) => {
                compressor.write(data).map_err(Error::new_io)?;
                let out = compressor.take_output();
                if out.is_empty() {
                    Ok(())
                } else {
                    self.write_framed(&out).await
                }
            }
            None => self.write_framed(data).await,
        }
    }

    /// Writes directly to the transport, bypassing compression and chunk
    /// framing but still counted.
    pub(crate) async fn write_raw(&mut self, data: &[u8]) -> crate::Result<()> {
        if matches!(self.sink, Sink::Null) {
            return Ok(());
        }
        self.sink.send(data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn write_framed(&mut self, data: &[u8]) -> crate::Result<()> {
        if matches!(self.sink, Sink::Null) {
            return Ok(());
        }
        if self.chunked {
            let mut framed = Vec::with_capacity(data.len() + 16);
            framed.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
            framed.extend_from_slice(data);
            framed.extend_from_slice(b"\r\n");
            self.sink.send(&framed).await?;
            self.bytes_written += framed.len() as u64;
            return Ok(());
        }
        if let Some(declared) = self.declared {
            // Flag-and-truncate: never put more than the declared length on
            // the wire.
            let remaining = declared.saturating_sub(self.bytes_written);
            if (data.len() as u64) > remaining {
                let keep = remaining as usize;
                if keep > 0 {
                    self.sink.send(&data[..keep]).await?;
                    self.bytes_written += keep as u64;
                }
                return Err(Error::new_user_body_overrun());
            }
        }
        self.sink.send(data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Finishes the chain: flushes the compressor, terminates chunked
    /// framing, ends the HTTP/2 stream. Idempotent.
    pub(crate) async fn finish(&mut self) -> crate::Result<()> {
        if self.finished {
            return Ok(());
        }
        if let Some(compressor) = self.compressor.take() {
            let rest = compressor.finish().map_err(Error::new_io)?;
            if !rest.is_empty() {
                self.write_framed(&rest).await?;
            }
        }
        if self.chunked && !matches!(self.sink, Sink::Null) {
            self.sink.send(b"0\r\n\r\n").await?;
            self.bytes_written += 5;
        }
        self.finished = true;
        match self.sink {
            Sink::Io(ref mut io) => io.flush().await.map_err(Error::new_io),
            Sink::H2(ref mut stream) => stream
                .send_data(Bytes::new(), true)
                .map_err(Error::new_h2),
            _ => Ok(()),
        }
    }

    /// Declared bytes the handler never wrote, if any.
    pub(crate) fn declared_shortfall(&self) -> u64 {
        match self.declared {
            Some(declared) if !self.chunked => declared.saturating_sub(self.bytes_written),
            _ => 0,
        }
    }

    pub(crate) fn into_sink(self) -> Sink {
        self.sink
    }
}

impl std::fmt::Debug for BodyWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyWriter")
            .field("chunked", &self.chunked)
            .field("compressed", &self.compressor.is_some())
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

enum Compressor {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl Compressor {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Compressor::Gzip(enc) => enc.write_all(data),
            Compressor::Deflate(enc) => enc.write_all(data),
        }
    }

    fn take_output(&mut self) -> Vec<u8> {
        match self {
            Compressor::Gzip(enc) => std::mem::take(enc.get_mut()),
            Compressor::Deflate(enc) => std::mem::take(enc.get_mut()),
        }
    }

    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Compressor::Gzip(enc) => enc.finish(),
            Compressor::Deflate(enc) => enc.finish(),
        }
    }
}

/// Sends one buffer over an HTTP/2 stream, reserving send capacity and
/// waiting for window updates as needed.
async fn h2_send(stream: &mut SendStream<Bytes>, mut data: Bytes) -> crate::Result<()> {
    while !data.is_empty() {
        stream.reserve_capacity(data.len());
        let available = match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(Ok(n)) => n,
            Some(Err(e)) => return Err(Error::new_h2(e)),
            // No longer streaming: the remote reset us.
            None => return Err(Error::new_h2(h2::Error::from(h2::Reason::CANCEL))),
        };
        let n = cmp::min(available, data.len());
        if n == 0 {
            continue;
        }
        let chunk = data.split_to(n);
        stream.send_data(chunk, false).map_err(Error::new_h2)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn captured(writer: BodyWriter) -> Vec<u8> {
        match writer.into_sink() {
            Sink::Buffer(buf) => buf,
            _ => panic!("expected buffer sink"),
        }
    }

    #[tokio::test]
    async fn identity_write_counts_exactly() {
        let mut writer = BodyWriter::new(Sink::Buffer(Vec::new()), false, None, Some(5));
        writer.write(b"hello").await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(writer.bytes_written(), 5);
        assert_eq!(writer.declared_shortfall(), 0);
        assert_eq!(captured(writer), b"hello");
    }

    #[tokio::test]
    async fn chunked_framing_shape() {
        let mut writer = BodyWriter::new(Sink::Buffer(Vec::new()), true, None, None);
        writer.write(b"hello").await.unwrap();
        writer.write(b"!").await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(captured(writer), b"5\r\nhello\r\n1\r\n!\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn overrun_truncates_and_errors() {
        let mut writer = BodyWriter::new(Sink::Buffer(Vec::new()), false, None, Some(3));
        let err = writer.write(b"hello").await.expect_err("overrun");
        assert!(err.to_string().contains("content-length"));
        assert_eq!(writer.bytes_written(), 3);
        assert_eq!(captured(writer), b"hel");
    }

    #[tokio::test]
    async fn shortfall_reported() {
        let mut writer = BodyWriter::new(Sink::Buffer(Vec::new()), false, None, Some(10));
        writer.write(b"hi").await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(writer.declared_shortfall(), 8);
    }

    #[tokio::test]
    async fn gzip_chunked_round_trips() {
        let mut writer = BodyWriter::new(
            Sink::Buffer(Vec::new()),
            true,
            Some(ContentCoding::Gzip),
            None,
        );
        writer.write(b"the quick brown fox jumps over the lazy dog").await.unwrap();
        writer.finish().await.unwrap();

        // un-chunk, then gunzip
        let wire = captured(writer);
        let mut compressed = Vec::new();
        let mut rest = &wire[..];
        loop {
            let pos = rest.windows(2).position(|w| w == b"\r\n").unwrap();
            let size = usize::from_str_radix(std::str::from_utf8(&rest[..pos]).unwrap(), 16).unwrap();
            rest = &rest[pos + 2..];
            if size == 0 {
                break;
            }
            compressed.extend_from_slice(&rest[..size]);
            rest = &rest[size + 2..];
        }
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain).unwrap();
        assert_eq!(plain, b"the quick brown fox jumps over the lazy dog");
    }

    #[tokio::test]
    async fn deflate_produces_zlib_stream() {
        let mut writer = BodyWriter::new(
            Sink::Buffer(Vec::new()),
            false,
            Some(ContentCoding::Deflate),
            None,
        );
        writer.write(b"hello hello hello").await.unwrap();
        writer.finish().await.unwrap();

        let wire = captured(writer);
        let mut decoder = flate2::read::ZlibDecoder::new(&wire[..]);
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain).unwrap();
        assert_eq!(plain, b"hello hello hello");
    }

    #[tokio::test]
    async fn null_sink_counts_nothing() {
        let mut writer = BodyWriter::new(Sink::Null, false, None, Some(5));
        writer.write(b"hello").await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(writer.bytes_written(), 0);
    }

    #[tokio::test]
    async fn write_after_finish_rejected() {
        let mut writer = BodyWriter::new(Sink::Buffer(Vec::new()), false, None, None);
        writer.finish().await.unwrap();
        assert!(writer.write(b"late").await.is_err());
    }
}
