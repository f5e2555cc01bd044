//! The per-connection driver.
//!
//! Every accepted socket runs one instance of [`serve_connection`] on its
//! own task: wait for first bytes, sanity-check and complete the TLS
//! handshake, sniff the HTTP/2 preface or honor ALPN, then either hand the
//! connection to an HTTP/2 session or run the HTTP/1 keep-alive loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::body::decode::BodyKind;
use crate::common::rewind::Rewind;
use crate::common::Io;
use crate::proto::h1::Buffered;
use crate::registry::{self, ServerContext};
use crate::request::ServerRequest;
use crate::response::ServerResponse;
use crate::server::ListenInfo;
use crate::{dispatch, proto};

/// How long a fresh connection may sit silent before it is answered with
/// `408` and dropped.
const FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn serve_connection(mut tcp: TcpStream, listen: Arc<ListenInfo>) {
    let Ok(peer) = tcp.peer_addr() else { return };

    // 1. Wait for the peer to say something.
    let mut first = [0u8; 1];
    match tokio::time::timeout(FIRST_BYTE_TIMEOUT, tcp.peek(&mut first)).await {
        Ok(Ok(0)) | Ok(Err(_)) => return,
        Ok(Ok(_)) => {}
        Err(_) => {
            trace!("connection from {} sent no data; replying 408", peer);
            let _ = dispatch::write_plain_response(
                &mut tcp,
                StatusCode::REQUEST_TIMEOUT,
                Some("Request timeout"),
                "No request received within 10 seconds.",
            )
            .await;
            return;
        }
    }

    // 2. The listen-level context decides protocol options for the
    //    connection until a Host header refines it.
    let Some(context) = registry::listen_context(&listen.address, listen.port) else {
        debug!("no context bound to {}:{}; dropping connection", listen.address, listen.port);
        return;
    };

    if listen.tls {
        serve_tls(tcp, peer, listen, context).await;
    } else {
        serve_cleartext(tcp, peer, listen, context).await;
    }
}

async fn serve_tls(
    mut tcp: TcpStream,
    peer: SocketAddr,
    listen: Arc<ListenInfo>,
    context: Arc<ServerContext>,
) {
    let mut prefix = [0u8; 6];
    if tcp.read_exact(&mut prefix).await.is_err() {
        return;
    }
    if !super::tls::looks_like_client_hello(&prefix) {
        trace!("plaintext bytes on TLS port from {}; replying 497", peer);
        let status = StatusCode::from_u16(497).expect("497 is a valid status code");
        let _ = dispatch::write_plain_response(
            &mut tcp,
            status,
            Some("HTTP to HTTPS"),
            "This port expects TLS connections.",
        )
        .await;
        return;
    }

    let io = Rewind::new_buffered(tcp, Bytes::copy_from_slice(&prefix));
    let stream = match super::tls::accept(io, &listen).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("TLS handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let alpn_h2 = stream
        .get_ref()
        .1
        .alpn_protocol()
        .map_or(false, |proto| proto.starts_with(b"h2"));

    let io: Io = Box::new(stream);
    if alpn_h2 && !context.settings.http2_disabled() {
        if let Err(e) = proto::h2::serve(io, peer, true, listen, context).await {
            debug!("http2 session with {} failed: {}", peer, e);
        }
    } else {
        http1_loop(io, peer, true, listen, context).await;
    }
}

async fn serve_cleartext(
    tcp: TcpStream,
    peer: SocketAddr,
    listen: Arc<ListenInfo>,
    context: Arc<ServerContext>,
) {
    let (io, is_h2) = match sniff_preface(tcp).await {
        Ok(sniffed) => sniffed,
        Err(e) => {
            trace!("error sniffing connection from {}: {}", peer, e);
            return;
        }
    };

    let io: Io = Box::new(io);
    if is_h2 && !context.settings.http2_disabled() {
        trace!("http2 preface from {}; entering http2 directly", peer);
        if let Err(e) = proto::h2::serve(io, peer, false, listen, context).await {
            debug!("http2 session with {} failed: {}", peer, e);
        }
    } else {
        http1_loop(io, peer, false, listen, context).await;
    }
}

/// Reads just enough of the connection to decide whether it opens with the
/// HTTP/2 preface; everything read is handed back through a rewind buffer.
async fn sniff_preface(mut tcp: TcpStream) -> std::io::Result<(Rewind<TcpStream>, bool)> {
    let preface = proto::h2::PREFACE;
    let mut buf = BytesMut::with_capacity(preface.len());
    while buf.len() < preface.len() && preface.starts_with(&buf) {
        if tcp.read_buf(&mut buf).await? == 0 {
            break;
        }
    }
    let is_h2 = buf.len() >= preface.len() && &buf[..preface.len()] == preface;
    Ok((Rewind::new_buffered(tcp, buf.freeze()), is_h2))
}

/// The HTTP/1 request loop: strictly serialized requests, keep-alive reuse
/// between them, and the upgrade handoff when a handler switches
/// protocols.
async fn http1_loop(
    io: Io,
    peer: SocketAddr,
    tls: bool,
    listen: Arc<ListenInfo>,
    context: Arc<ServerContext>,
) {
    let (read_half, write_half) = tokio::io::split(io);
    let mut reader = Buffered::new(read_half);
    let mut writer = Some(write_half);
    let keep_alive_timeout = context.settings.keep_alive_timeout;

    loop {
        if !reader.wait_for_data(keep_alive_timeout).await {
            trace!("connection from {} idle or closed; done", peer);
            break;
        }

        let head = match reader
            .read_head(context.settings.max_request_header_size)
            .await
        {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(e) => {
                debug!("failed to parse request from {}: {}", peer, e);
                if let Some(mut write_half) = writer.take() {
                    let _ = dispatch::write_plain_response(
                        &mut write_half,
                        e.status_code(),
                        None,
                        &format!("Failed to parse the request:\n{e}"),
                    )
                    .await;
                    let _ = write_half.shutdown().await;
                }
                return;
            }
        };

        let req = match ServerRequest::from_h1(head, reader, peer, tls, &context.settings) {
            Ok(req) => req,
            Err(e) => {
                debug!("rejecting request from {}: {}", peer, e);
                if let Some(mut write_half) = writer.take() {
                    let _ = dispatch::write_plain_response(
                        &mut write_half,
                        e.status_code(),
                        None,
                        &format!("{e}"),
                    )
                    .await;
                    let _ = write_half.shutdown().await;
                }
                return;
            }
        };

        let version = req.version();
        let res = ServerResponse::h1(
            writer.take().expect("write half available"),
            version,
            tls,
        );

        let (outcome, req, res) = dispatch::handle_request(req, res, &listen, &context).await;

        if let Some(pending) = outcome.upgrade {
            let Some(write_half) = res.into_write_half() else {
                return;
            };
            let BodyKind::H1 { io, .. } = req.into_body_kind() else {
                return;
            };
            let (read_half, leftover) = io.into_parts();
            let io = read_half.unsplit(write_half);
            pending.fulfill(io, leftover.freeze());
            return;
        }

        let body_kind = req.into_body_kind();
        if !outcome.keep_alive {
            if let Some(mut write_half) = res.into_write_half() {
                let _ = write_half.shutdown().await;
            }
            return;
        }

        let BodyKind::H1 { io, .. } = body_kind else {
            return;
        };
        reader = io;
        match res.into_write_half() {
            Some(write_half) => writer = Some(write_half),
            None => return,
        }
    }

    if let Some(mut write_half) = writer {
        let _ = write_half.shutdown().await;
    }
}
