//! HTTP/2 session adapter.
//!
//! The framing layer is consumed as a black box: a session is handed a
//! transport, and every accepted stream yields a request head plus a
//! response handle. Each stream runs as its own task through the shared
//! dispatch path, so handler code cannot tell the protocols apart.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use h2::server::SendResponse;
use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dispatch;
use crate::registry::ServerContext;
use crate::request::ServerRequest;
use crate::response::ServerResponse;
use crate::server::ListenInfo;
use crate::Error;

/// The fixed client connection preface.
pub(crate) const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Runs one HTTP/2 session until the peer goes away. Streams are served
/// concurrently, each on its own task.
pub(crate) async fn serve<T>(
    io: T,
    peer: SocketAddr,
    tls: bool,
    listen: Arc<ListenInfo>,
    context: Arc<ServerContext>,
) -> crate::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let settings = &context.settings;
    let mut builder = h2::server::Builder::default();
    builder
        .max_concurrent_streams(settings.http2_max_concurrent_streams)
        .max_frame_size(settings.http2_max_frame_size);

    let mut conn = builder.handshake(io).await.map_err(Error::new_h2)?;
    trace!("http2 session established with {}", peer);

    while let Some(accepted) = conn.accept().await {
        let (request, respond) = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                debug!("http2 accept error: {}", e);
                return Err(Error::new_h2(e));
            }
        };
        let listen = listen.clone();
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_stream(request, respond, peer, tls, listen, context).await {
                debug!("http2 stream error: {} (reset {:?})", e, e.h2_reason());
            }
        });
    }

    trace!("http2 session with {} ended", peer);
    Ok(())
}

async fn handle_stream(
    request: http::Request<h2::RecvStream>,
    mut respond: SendResponse<Bytes>,
    peer: SocketAddr,
    tls: bool,
    listen: Arc<ListenInfo>,
    context: Arc<ServerContext>,
) -> crate::Result<()> {
    let req = match ServerRequest::from_h2(request, peer, tls, &context.settings) {
        Ok(req) => req,
        Err(e) => {
            // refuse the stream with the projected status, e.g. 413
            let head = http::Response::builder()
                .status(e.status_code())
                .body(())
                .expect("static refusal response");
            let _ = respond.send_response(head, true);
            return Err(e);
        }
    };

    let res = ServerResponse::h2(respond, tls);
    let (_outcome, _req, _res) = dispatch::handle_request(req, res, &listen, &context).await;
    Ok(())
}

/// Validates the header triple of an `h2c` upgrade request and decodes its
/// `HTTP2-Settings` payload.
pub(crate) fn h2c_settings(headers: &HeaderMap) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let upgrade = headers.get(http::header::UPGRADE)?.to_str().ok()?;
    if !upgrade
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("h2c"))
    {
        return None;
    }

    let connection = headers.get(http::header::CONNECTION)?.to_str().ok()?;
    let mut has_upgrade = false;
    let mut has_settings = false;
    for token in connection.split(',') {
        let token = token.trim();
        has_upgrade |= token.eq_ignore_ascii_case("upgrade");
        has_settings |= token.eq_ignore_ascii_case("http2-settings");
    }
    if !has_upgrade || !has_settings {
        return None;
    }

    let settings = headers.get("http2-settings")?;
    URL_SAFE_NO_PAD.decode(settings.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn preface_is_24_bytes() {
        assert_eq!(PREFACE.len(), 24);
    }

    #[test]
    fn h2c_triple_detected() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert(
            http::header::CONNECTION,
            HeaderValue::from_static("Upgrade, HTTP2-Settings"),
        );
        headers.insert("http2-settings", HeaderValue::from_static("AAMAAABkAARAAAAAAAIAAAAA"));
        let settings = h2c_settings(&headers).expect("valid upgrade");
        assert!(!settings.is_empty());
    }

    #[test]
    fn h2c_requires_full_triple() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert("http2-settings", HeaderValue::from_static("AAMAAABkAARAAAAAAAIAAAAA"));
        assert!(h2c_settings(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(http::header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(
            http::header::CONNECTION,
            HeaderValue::from_static("Upgrade, HTTP2-Settings"),
        );
        assert!(h2c_settings(&headers).is_none());
    }
}
