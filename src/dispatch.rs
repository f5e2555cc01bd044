//! The protocol-independent request handling spine.
//!
//! Both the HTTP/1 loop and the HTTP/2 stream adapter feed requests
//! through [`handle_request`]: virtual-host resolution, processing
//! options, `100-continue`, default headers, compression negotiation, the
//! user handler, the default `404`, error projection, body drain,
//! finalization and access logging all live here, above the transport
//! abstraction.

use std::sync::Arc;

use http::header::{CONTENT_ENCODING, DATE, SERVER};
use http::{StatusCode, Version};
use tokio::io::AsyncWriteExt;

use crate::common::date;
use crate::registry::{self, ServerContext};
use crate::request::ServerRequest;
use crate::response::ServerResponse;
use crate::server::ListenInfo;
use crate::service::ErrorInfo;
use crate::settings::ServerOption;
use crate::{headers, upgrade, Error};

pub(crate) struct RequestOutcome {
    pub(crate) keep_alive: bool,
    pub(crate) upgrade: Option<upgrade::Pending>,
}

/// Serves one request end to end. The request and response objects are
/// returned so the caller can recover the transport halves they own.
pub(crate) async fn handle_request(
    mut req: ServerRequest,
    mut res: ServerResponse,
    listen: &ListenInfo,
    listen_context: &Arc<ServerContext>,
) -> (RequestOutcome, ServerRequest, ServerResponse) {
    let mut context = listen_context.clone();

    // Virtual host resolution; a better Host match switches the context
    // for this request only.
    let mut host_error = None;
    match req.headers().get(http::header::HOST) {
        Some(value) => match headers::parse_host(value) {
            Some((host, explicit_port)) => {
                if let Some(better) =
                    registry::resolve_virtual_host(&listen.address, listen.port, &host, explicit_port)
                {
                    context = better;
                }
            }
            None => host_error = Some(Error::new_parse(crate::error::Parse::MissingHost)),
        },
        None if req.version() == Version::HTTP_11 => {
            host_error = Some(Error::new_parse(crate::error::Parse::MissingHost));
        }
        None => {}
    }

    let settings = context.settings.clone();

    // h2c upgrade request: the bound framing layer only enters HTTP/2 via
    // ALPN or the connection preface, so a valid upgrade is answered over
    // HTTP/1.1 (permitted by RFC 7230 §6.7).
    if !listen.tls && !settings.http2_disabled() && req.version() == Version::HTTP_11 {
        if let Some(h2_settings) = crate::proto::h2::h2c_settings(req.headers()) {
            debug!(
                "h2c upgrade requested ({} settings bytes); serving over HTTP/1.1",
                h2_settings.len()
            );
        }
    }

    let keep_alive_secs = settings.keep_alive_timeout.as_secs();
    let is_head = req.method() == http::Method::HEAD;

    let mut error = host_error;
    if error.is_none() {
        if let Err(e) = req.apply_options(&settings).await {
            error = Some(e);
        }
    }

    res.set_request_state(
        is_head,
        req.persistent(),
        (req.version() != Version::HTTP_2 && req.persistent()).then_some(keep_alive_secs),
        settings.session_store.clone(),
        req.session().cloned(),
    );

    // Default response headers.
    res.headers_mut().insert(
        SERVER,
        settings
            .server_string
            .parse()
            .unwrap_or(http::HeaderValue::from_static("wharf")),
    );
    res.headers_mut().insert(DATE, date::update_and_header_value());

    // Compression is negotiated in client priority order; the encoder
    // itself is built lazily with the body writer.
    if settings.use_compression && !res.headers().contains_key(CONTENT_ENCODING) {
        if let Some(coding) = headers::accept_encoding_preference(req.headers()) {
            res.headers_mut().insert(
                CONTENT_ENCODING,
                http::HeaderValue::from_static(coding.as_str()),
            );
        }
    }

    if error.is_none() && req.expects_continue() {
        if let Err(e) = res.send_continue().await {
            debug!("failed to send 100 Continue: {}", e);
            error = Some(e);
        }
    }

    if error.is_none() {
        if let Err(e) = context.handler.handle(&mut req, &mut res).await {
            error = Some(e);
        }
    }

    let upgraded = res.take_upgrade();

    match error {
        Some(err) => project_error(&mut req, &mut res, &settings, err).await,
        None => {
            if !res.header_written() && upgraded.is_none() {
                let err: Error =
                    crate::HttpStatusError::new(StatusCode::NOT_FOUND, "Not Found").into();
                project_error(&mut req, &mut res, &settings, err).await;
            }
        }
    }

    // The transport must be left aligned on the next message boundary.
    if upgraded.is_none() {
        if let Err(e) = req.body().drain().await {
            debug!("failed to drain request body: {}", e);
            res.set_force_close();
        }
    }

    if let Err(e) = res.finalize().await {
        debug!("error finalizing response: {}", e);
        res.set_force_close();
    }

    for file in req.files.drain(..) {
        if let Err(e) = std::fs::remove_file(&file.path) {
            debug!("failed to remove upload {}: {}", file.path.display(), e);
        }
    }

    for logger in &settings.access_loggers {
        logger.log(&req, &res);
    }

    let keep_alive = req.persistent()
        && !res.force_close()
        && req.version() != Version::HTTP_2
        && upgraded.is_none();

    (
        RequestOutcome {
            keep_alive,
            upgrade: upgraded,
        },
        req,
        res,
    )
}

/// Projects an error onto the response: invokes the error page handler (or
/// the default plaintext page) when the head is still unwritten, otherwise
/// logs and forces the connection closed.
async fn project_error(
    req: &mut ServerRequest,
    res: &mut ServerResponse,
    settings: &crate::ServerSettings,
    err: Error,
) {
    if res.header_written() {
        error!("error after response head was sent: {}", err);
        res.set_force_close();
        return;
    }

    let status = err.status_code();
    let info = error_info(&err, status, settings.options);
    res.set_status(status);
    if status_justifies_close(status) {
        res.set_force_close();
    }

    if let Some(ref handler) = settings.error_page_handler {
        match handler.handle(req, res, &info).await {
            Ok(()) => return,
            Err(e) => {
                error!("error page handler failed: {}", e);
                if res.header_written() {
                    res.set_force_close();
                    return;
                }
            }
        }
    }

    let reason = status.canonical_reason().unwrap_or("Unknown");
    let body = format!(
        "{} - {}\n\n{}\n\nInternal error information:\n{}",
        status.as_u16(),
        reason,
        info.message,
        info.debug
    );
    if let Err(e) = res.write_body(body).await {
        debug!("failed to write error page: {}", e);
        res.set_force_close();
    }
}

fn error_info(err: &Error, status: StatusCode, options: ServerOption) -> ErrorInfo {
    let message = match err.as_status_error() {
        Some(status_err) => status_err.message().to_string(),
        None => err.to_string(),
    };

    let mut debug = String::new();
    if let Some(status_err) = err.as_status_error() {
        if let Some(text) = status_err.debug_message() {
            debug.push_str(text);
        }
    }
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if !debug.is_empty() {
            debug.push_str(": ");
        }
        debug.push_str(&cause.to_string());
        source = cause.source();
    }
    // Traces accompany unexpected server errors only; typed status errors
    // already carry their own debug text.
    if options.contains(ServerOption::ERROR_STACK_TRACES)
        && err.as_status_error().is_none()
        && status.is_server_error()
    {
        let trace = std::backtrace::Backtrace::force_capture().to_string();
        if !debug.is_empty() {
            debug.push('\n');
        }
        debug.push_str(&trace);
    }

    ErrorInfo {
        status,
        message: sanitize_utf8(&message),
        debug: sanitize_utf8(&debug),
    }
}

/// Statuses after which the connection is not worth keeping: the request
/// could not be read coherently, or the failure is likely to repeat.
fn status_justifies_close(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
            | StatusCode::INTERNAL_SERVER_ERROR
    )
}

fn sanitize_utf8(s: &str) -> String {
    String::from_utf8_lossy(s.as_bytes()).into_owned()
}

/// Writes a bare HTTP/1.1 response straight onto a transport, for failures
/// that occur before a request object exists (initial read timeout, TLS
/// mismatch, head parse errors).
pub(crate) async fn write_plain_response<W>(
    io: &mut W,
    status: StatusCode,
    reason: Option<&str>,
    body: &str,
) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    date::update();
    let reason = reason
        .or_else(|| status.canonical_reason())
        .unwrap_or("Unknown");
    let mut head = Vec::with_capacity(128 + body.len());
    head.extend_from_slice(b"HTTP/1.1 ");
    head.extend_from_slice(status.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(reason.as_bytes());
    head.extend_from_slice(b"\r\ndate: ");
    date::extend(&mut head);
    head.extend_from_slice(b"\r\ncontent-type: text/plain; charset=UTF-8\r\ncontent-length: ");
    head.extend_from_slice(body.len().to_string().as_bytes());
    head.extend_from_slice(b"\r\nconnection: close\r\n\r\n");
    head.extend_from_slice(body.as_bytes());
    io.write_all(&head).await?;
    io.flush().await
}
