//! HTTP upgrades.
//!
//! After a handler calls
//! [`ServerResponse::switch_protocol`][crate::ServerResponse::switch_protocol],
//! the connection driver finishes the `101` response, steps out of the
//! HTTP state machine, and fulfills the [`OnUpgrade`] future with the raw
//! connection so the new protocol can take over.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_channel::oneshot;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::common::rewind::Rewind;
use crate::common::Io;

/// An upgraded HTTP connection.
///
/// Implements `AsyncRead`/`AsyncWrite` over the underlying transport,
/// transparently replaying any bytes the engine had already buffered past
/// the upgrade request.
pub struct Upgraded {
    io: Rewind<Io>,
}

impl Upgraded {
    pub(crate) fn new(io: Io, read_buf: Bytes) -> Self {
        Upgraded {
            io: Rewind::new_buffered(io, read_buf),
        }
    }
}

impl AsyncRead for Upgraded {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Upgraded {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded").finish()
    }
}

/// A future resolving to the [`Upgraded`] connection once the `101`
/// response is on the wire and the driver has released the transport.
#[derive(Debug)]
pub struct OnUpgrade {
    rx: oneshot::Receiver<crate::Result<Upgraded>>,
}

impl Future for OnUpgrade {
    type Output = crate::Result<Upgraded>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_canceled)) => Poll::Ready(Err(crate::Error::new_user_no_upgrade())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The sending side held by the response until the driver fulfills it.
pub(crate) struct Pending {
    tx: oneshot::Sender<crate::Result<Upgraded>>,
}

pub(crate) fn pending() -> (Pending, OnUpgrade) {
    let (tx, rx) = oneshot::channel();
    (Pending { tx }, OnUpgrade { rx })
}

impl Pending {
    pub(crate) fn fulfill(self, io: Io, read_buf: Bytes) {
        trace!("upgrade handoff complete");
        let _ = self.tx.send(Ok(Upgraded::new(io, read_buf)));
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn fulfilled_upgrade_replays_buffer() {
        let (pending, on_upgrade) = pending();
        let mock = tokio_test::io::Builder::new()
            .read(b"later")
            .write(b"pong")
            .build();
        pending.fulfill(Box::new(mock), Bytes::from_static(b"early-"));

        let mut upgraded = on_upgrade.await.expect("upgrade");
        let mut buf = [0u8; 11];
        upgraded.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"early-later");
        upgraded.write_all(b"pong").await.expect("write");
    }

    #[tokio::test]
    async fn dropped_pending_is_no_upgrade() {
        let (pending, on_upgrade) = pending();
        drop(pending);
        assert!(on_upgrade.await.is_err());
    }
}
