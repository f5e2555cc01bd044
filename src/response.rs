//! The server-side response object handed to handlers.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{
    CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, TRANSFER_ENCODING,
    UPGRADE,
};
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, WriteHalf};

use crate::body::encode::Sink;
use crate::body::BodyWriter;
use crate::common::Io;
use crate::cookie::Cookie;
use crate::headers::ContentCoding;
use crate::proto::h1::parse::encode_head;
use crate::session::{Session, SessionStore, KEY_COOKIE_PATH, KEY_COOKIE_SECURE};
use crate::settings::SessionOption;
use crate::upgrade::{self, OnUpgrade};
use crate::Error;

/// Default content type for text bodies.
const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";

/// The response writer handed to handlers.
///
/// Status, headers and cookies may be changed freely until the head goes
/// on the wire; the first body write (or an explicit
/// [`write_void_body`](Self::write_void_body)) emits it. Mutating the head
/// afterwards is a programming error and panics.
pub struct ServerResponse {
    status: StatusCode,
    phrase: Option<String>,
    version: Version,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    header_written: bool,
    is_head: bool,
    tls: bool,
    persistent: bool,
    keep_alive_secs: Option<u64>,

    out: Out,
    writer: Option<BodyWriter>,

    session_store: Option<Arc<dyn SessionStore>>,
    session: Option<Session>,

    upgrade: Option<upgrade::Pending>,
    force_close: bool,
    bytes_final: u64,
}

enum Out {
    H1 { io: Option<WriteHalf<Io>> },
    H2 {
        respond: h2::server::SendResponse<Bytes>,
    },
    Test { buf: Option<Vec<u8>> },
}

impl ServerResponse {
    pub(crate) fn h1(io: WriteHalf<Io>, version: Version, tls: bool) -> Self {
        ServerResponse::new(Out::H1 { io: Some(io) }, version, tls)
    }

    pub(crate) fn h2(respond: h2::server::SendResponse<Bytes>, tls: bool) -> Self {
        ServerResponse::new(Out::H2 { respond }, Version::HTTP_2, tls)
    }

    pub(crate) fn test() -> Self {
        ServerResponse::new(Out::Test { buf: Some(Vec::new()) }, Version::HTTP_11, false)
    }

    fn new(out: Out, version: Version, tls: bool) -> Self {
        ServerResponse {
            status: StatusCode::OK,
            phrase: None,
            version,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            header_written: false,
            is_head: false,
            tls,
            persistent: true,
            keep_alive_secs: None,
            out,
            writer: None,
            session_store: None,
            session: None,
            upgrade: None,
            force_close: false,
            bytes_final: 0,
        }
    }

    pub(crate) fn set_request_state(
        &mut self,
        is_head: bool,
        persistent: bool,
        keep_alive_secs: Option<u64>,
        session_store: Option<Arc<dyn SessionStore>>,
        session: Option<Session>,
    ) {
        self.is_head = is_head;
        self.persistent = persistent;
        self.keep_alive_secs = keep_alive_secs;
        self.session_store = session_store;
        self.session = session;
    }

    // ===== head accessors =====

    /// The response status code.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Sets the status code.
    ///
    /// # Panics
    ///
    /// Panics if the head was already written.
    pub fn set_status(&mut self, status: StatusCode) {
        self.assert_unwritten();
        self.status = status;
    }

    /// Overrides the reason phrase on the status line (HTTP/1 only; the
    /// phrase does not exist in HTTP/2 framing).
    pub fn set_status_phrase(&mut self, phrase: impl Into<String>) {
        self.assert_unwritten();
        self.phrase = Some(phrase.into());
    }

    /// The HTTP version of the response.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the response headers.
    ///
    /// # Panics
    ///
    /// Panics if the head was already written.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.assert_unwritten();
        &mut self.headers
    }

    /// Sets one header, replacing previous values.
    ///
    /// # Panics
    ///
    /// Panics if the head was already written, or on an invalid value.
    pub fn set_header(&mut self, name: http::header::HeaderName, value: &str) {
        self.assert_unwritten();
        self.headers
            .insert(name, value.parse().expect("invalid header value"));
    }

    /// The `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Whether the head is already on the wire.
    pub fn header_written(&self) -> bool {
        self.header_written
    }

    /// Body bytes put on the wire so far.
    pub fn bytes_written(&self) -> u64 {
        self.writer
            .as_ref()
            .map(|w| w.bytes_written())
            .unwrap_or(self.bytes_final)
    }

    fn assert_unwritten(&self) {
        assert!(
            !self.header_written,
            "response head was already sent; status, headers and cookies are frozen"
        );
    }

    // ===== cookies & sessions =====

    /// Adds a cookie. A `None` value produces an immediate-expiry deletion
    /// cookie. The returned reference can be used to adjust attributes.
    ///
    /// # Panics
    ///
    /// Panics if the head was already written.
    pub fn set_cookie(&mut self, name: &str, value: Option<&str>) -> &mut Cookie {
        self.assert_unwritten();
        let cookie = match value {
            Some(value) => Cookie::new(name, value),
            None => Cookie::expired(name),
        };
        self.cookies.push(cookie);
        self.cookies.last_mut().expect("cookie just pushed")
    }

    /// Cookies queued for this response.
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Starts a session and emits its cookie.
    ///
    /// The `Secure` attribute defaults to whether the request arrived over
    /// TLS; [`SessionOption::SECURE`] / [`SessionOption::NO_SECURE`]
    /// override it.
    pub fn start_session(
        &mut self,
        path: &str,
        options: SessionOption,
    ) -> crate::Result<Session> {
        self.assert_unwritten();
        let store = self
            .session_store
            .clone()
            .ok_or_else(|| Error::new_config("no session store configured"))?;

        let secure = if options.contains(SessionOption::SECURE) {
            true
        } else if options.contains(SessionOption::NO_SECURE) {
            false
        } else {
            self.tls
        };

        let id = store.create();
        let session = Session::new(id.clone(), store);
        session.set(KEY_COOKIE_PATH, path);
        session.set(KEY_COOKIE_SECURE, if secure { "true" } else { "false" });

        let cookie = self.set_cookie(crate::session::SESSION_COOKIE_NAME, Some(&id));
        cookie.set_path(path);
        cookie.set_secure(secure);
        if options.contains(SessionOption::HTTP_ONLY) {
            cookie.set_http_only(true);
        }

        self.session = Some(session.clone());
        Ok(session)
    }

    /// Destroys the request's session and replaces its cookie with a
    /// deletion cookie.
    pub fn terminate_session(&mut self) {
        self.assert_unwritten();
        let Some(session) = self.session.take() else {
            return;
        };
        let path = session.get(KEY_COOKIE_PATH).unwrap_or_else(|| "/".into());
        let secure = session.get(KEY_COOKIE_SECURE).as_deref() == Some("true");
        session.destroy();

        let cookie = self.set_cookie(crate::session::SESSION_COOKIE_NAME, None);
        cookie.set_path(&path);
        cookie.set_secure(secure);
    }

    // ===== body writing =====

    /// Writes a complete body, setting `Content-Length` and a
    /// `text/plain; charset=UTF-8` content type if none is set.
    pub async fn write_body(&mut self, body: impl AsRef<[u8]>) -> crate::Result<()> {
        self.write_body_with_type(body, TEXT_PLAIN).await
    }

    /// Writes a complete body with the given content type.
    pub async fn write_body_with_type(
        &mut self,
        body: impl AsRef<[u8]>,
        content_type: &str,
    ) -> crate::Result<()> {
        let body = body.as_ref();
        if !self.header_written {
            if !self.headers.contains_key(CONTENT_TYPE) {
                self.headers
                    .insert(CONTENT_TYPE, content_type.parse().expect("content type"));
            }
            self.headers
                .insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        }
        self.write_head(true).await?;
        self.writer_mut()?.write(body).await
    }

    /// Streams a body through the encoder chain without a known length.
    pub async fn write_body_stream<R>(
        &mut self,
        mut reader: R,
        content_type: Option<&str>,
    ) -> crate::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        if !self.header_written && !self.headers.contains_key(CONTENT_TYPE) {
            let content_type = content_type.unwrap_or("application/octet-stream");
            self.headers
                .insert(CONTENT_TYPE, content_type.parse().expect("content type"));
        }
        self.write_head(true).await?;

        let mut buf = [0u8; 8 * 1024];
        loop {
            let n = reader.read(&mut buf).await.map_err(Error::new_io)?;
            if n == 0 {
                return Ok(());
            }
            self.writer_mut()?.write(&buf[..n]).await?;
        }
    }

    /// Copies body bytes directly to the transport, bypassing chunked
    /// framing and compression (the byte counter still observes them). The
    /// caller is responsible for coherent headers.
    pub async fn write_raw_body<R>(
        &mut self,
        mut reader: R,
        num_bytes: Option<u64>,
    ) -> crate::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.write_head_raw().await?;
        let writer = self.writer_mut()?;

        let mut remaining = num_bytes;
        let mut buf = [0u8; 8 * 1024];
        loop {
            let want = match remaining {
                Some(0) => return Ok(()),
                Some(n) => std::cmp::min(n, buf.len() as u64) as usize,
                None => buf.len(),
            };
            let n = reader.read(&mut buf[..want]).await.map_err(Error::new_io)?;
            if n == 0 {
                return match remaining {
                    Some(_) => Err(Error::new_incomplete()),
                    None => Ok(()),
                };
            }
            writer.write_raw(&buf[..n]).await?;
            if let Some(ref mut rem) = remaining {
                *rem -= n as u64;
            }
        }
    }

    /// Serializes a JSON value with a length-measuring pre-pass so the
    /// response carries `Content-Length`.
    pub async fn write_json_body<T: serde::Serialize>(&mut self, value: &T) -> crate::Result<()> {
        let body = serde_json::to_vec(value).map_err(Error::new_user_handler)?;
        self.write_body_with_type(body, "application/json; charset=UTF-8")
            .await
    }

    /// Serializes a JSON value straight through the chunked body writer,
    /// skipping the length pre-pass.
    pub async fn write_json_body_chunked<T: serde::Serialize>(
        &mut self,
        value: &T,
    ) -> crate::Result<()> {
        let body = serde_json::to_vec(value).map_err(Error::new_user_handler)?;
        if !self.header_written && !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=UTF-8"),
            );
        }
        self.write_head(true).await?;
        self.writer_mut()?.write(&body).await
    }

    /// Emits the head with no body at all, for 204/304-style responses.
    ///
    /// `Content-Length` or `Transfer-Encoding` must not be present unless
    /// this is a HEAD response.
    pub async fn write_void_body(&mut self) -> crate::Result<()> {
        if !self.is_head
            && (self.headers.contains_key(CONTENT_LENGTH)
                || self.headers.contains_key(TRANSFER_ENCODING))
        {
            return Err(Error::new_user_unexpected_body());
        }
        self.write_head(false).await
    }

    /// Sets `Location` and sends the short redirect body with status
    /// `302 Found`.
    pub async fn redirect(&mut self, url: &str) -> crate::Result<()> {
        self.redirect_with_status(url, StatusCode::FOUND).await
    }

    /// Sets `Location` and sends the short redirect body with the given
    /// status.
    pub async fn redirect_with_status(
        &mut self,
        url: &str,
        status: StatusCode,
    ) -> crate::Result<()> {
        self.set_status(status);
        self.headers
            .insert(LOCATION, url.parse().map_err(|_| Error::new_user_handler("invalid redirect URL"))?);
        self.write_body("redirecting...").await
    }

    /// Switches protocols: emits a `101 Switching Protocols` head with
    /// `Upgrade: <protocol>` and returns a future resolving to the raw
    /// connection once the engine steps aside.
    pub async fn switch_protocol(&mut self, protocol: &str) -> crate::Result<OnUpgrade> {
        if !matches!(self.out, Out::H1 { .. }) {
            return Err(Error::new_user_no_upgrade());
        }
        self.set_status(StatusCode::SWITCHING_PROTOCOLS);
        self.headers.insert(
            UPGRADE,
            protocol
                .parse()
                .map_err(|_| Error::new_user_handler("invalid upgrade protocol name"))?,
        );
        self.headers
            .insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        self.write_head(false).await?;

        let (pending, on_upgrade) = upgrade::pending();
        self.upgrade = Some(pending);
        Ok(on_upgrade)
    }

    /// The streaming body writer, arming the encoder chain (and emitting
    /// the head) on first access.
    pub async fn body_writer(&mut self) -> crate::Result<&mut BodyWriter> {
        self.write_head(true).await?;
        self.writer_mut()
    }

    fn writer_mut(&mut self) -> crate::Result<&mut BodyWriter> {
        self.writer
            .as_mut()
            .ok_or_else(Error::new_user_unexpected_body)
    }

    // ===== head emission =====

    /// Emits the response head, arming the body writer when `has_body`.
    async fn write_head(&mut self, has_body: bool) -> crate::Result<()> {
        if self.header_written {
            return Ok(());
        }
        crate::common::date::update();

        match self.out {
            Out::H2 { .. } => self.write_head_h2(has_body),
            Out::H1 { .. } | Out::Test { .. } => self.write_head_h1(has_body, false).await,
        }
    }

    /// Emits the head for a raw body: no framing decisions are made and no
    /// encoder filters are armed.
    async fn write_head_raw(&mut self) -> crate::Result<()> {
        if self.header_written {
            return Ok(());
        }
        match self.out {
            Out::H2 { .. } => self.write_head_h2(true),
            Out::H1 { .. } | Out::Test { .. } => self.write_head_h1(true, true).await,
        }
    }

    async fn write_head_h1(&mut self, has_body: bool, raw: bool) -> crate::Result<()> {
        let mut chunked = false;
        let mut declared = None;
        let mut coding = None;

        if has_body && !raw {
            coding = self.negotiated_coding();
            if coding.is_some() && self.headers.contains_key(CONTENT_LENGTH) {
                // compressed size is unknown
                self.headers.remove(CONTENT_LENGTH);
            }
            declared = self
                .headers
                .get(CONTENT_LENGTH)
                .and_then(crate::headers::content_length_parse);
            if declared.is_none() && self.status != StatusCode::SWITCHING_PROTOCOLS {
                if self.version == Version::HTTP_10 {
                    // close-delimited body
                    self.force_close = true;
                } else {
                    self.headers
                        .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                    chunked = true;
                }
            }
        }

        if !self.persistent || self.force_close {
            self.headers
                .entry(CONNECTION)
                .or_insert(HeaderValue::from_static("close"));
        } else if self.version == Version::HTTP_10 {
            self.headers
                .entry(CONNECTION)
                .or_insert(HeaderValue::from_static("keep-alive"));
        } else if self.status != StatusCode::SWITCHING_PROTOCOLS {
            if let Some(secs) = self.keep_alive_secs {
                self.headers
                    .entry(http::header::HeaderName::from_static("keep-alive"))
                    .or_insert_with(|| {
                        HeaderValue::from_str(&format!("timeout={secs}")).expect("keep-alive value")
                    });
            }
        }

        let mut head = Vec::with_capacity(256);
        encode_head(
            &mut head,
            self.version,
            self.status,
            self.phrase.as_deref(),
            &self.headers,
            &self.cookies,
        );

        let is_head = self.is_head;
        let sink = match &mut self.out {
            Out::H1 { io } => {
                let mut taken = io.take().expect("h1 write half present");
                taken.write_all(&head).await.map_err(Error::new_io)?;
                if is_head {
                    // keep the transport for finalize, discard body writes
                    *io = Some(taken);
                    Sink::Null
                } else {
                    Sink::Io(taken)
                }
            }
            Out::Test { buf } => {
                let mut taken = buf.take().expect("test buffer present");
                taken.extend_from_slice(&head);
                if is_head {
                    *buf = Some(taken);
                    Sink::Null
                } else {
                    Sink::Buffer(taken)
                }
            }
            Out::H2 { .. } => unreachable!("h1 head emission on non-h1 output"),
        };

        self.header_written = true;
        if has_body || self.is_head {
            let declared = if self.is_head { None } else { declared };
            self.writer = Some(BodyWriter::new(sink, chunked, coding, declared));
        } else {
            // no body at all; hold the transport for finalize
            match sink {
                Sink::Io(io) => self.out = Out::H1 { io: Some(io) },
                Sink::Buffer(buf) => self.out = Out::Test { buf: Some(buf) },
                _ => {}
            }
        }
        Ok(())
    }

    fn write_head_h2(&mut self, has_body: bool) -> crate::Result<()> {
        crate::headers::strip_connection_headers(&mut self.headers);
        let coding = if has_body { self.negotiated_coding() } else { None };
        if coding.is_some() {
            self.headers.remove(CONTENT_LENGTH);
        }

        let mut builder = http::Response::builder()
            .status(self.status)
            .version(Version::HTTP_2);
        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value);
        }
        for cookie in &self.cookies {
            builder = builder.header(http::header::SET_COOKIE, cookie.render());
        }
        let head = builder.body(()).map_err(Error::new_user_handler)?;

        let end_of_stream = !has_body || self.is_head;
        let Out::H2 { ref mut respond } = self.out else {
            unreachable!("h2 head emission on non-h2 output");
        };
        let stream = respond
            .send_response(head, end_of_stream)
            .map_err(Error::new_h2)?;

        self.header_written = true;
        if !end_of_stream {
            self.writer = Some(BodyWriter::new(Sink::H2(stream), false, coding, None));
        } else if self.is_head {
            self.writer = Some(BodyWriter::new(Sink::Null, false, None, None));
        }
        Ok(())
    }

    fn negotiated_coding(&self) -> Option<ContentCoding> {
        let value = self.headers.get(CONTENT_ENCODING)?.to_str().ok()?;
        if value.eq_ignore_ascii_case("gzip") {
            Some(ContentCoding::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(ContentCoding::Deflate)
        } else {
            None
        }
    }

    // ===== driver interface =====

    /// Writes `100 Continue` directly to the transport, ahead of the real
    /// head.
    pub(crate) async fn send_continue(&mut self) -> crate::Result<()> {
        if let Out::H1 { io: Some(ref mut io) } = self.out {
            io.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                .await
                .map_err(Error::new_io)?;
        }
        Ok(())
    }

    /// Finishes the encoder chain and flushes the transport. Runs on every
    /// exit path; errors are reported to the caller for logging.
    pub(crate) async fn finalize(&mut self) -> crate::Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.finish().await?;
            self.bytes_final = writer.bytes_written();
            if writer.declared_shortfall() > 0 {
                warn!("content-length undershot by handler; closing connection");
                self.force_close = true;
            }
        }
        // `finish` flushes sinks it owns; the HEAD and void-body paths keep
        // the transport here instead.
        if let Out::H1 { io: Some(ref mut io) } = self.out {
            io.flush().await.map_err(Error::new_io)?;
        }
        Ok(())
    }

    pub(crate) fn force_close(&self) -> bool {
        self.force_close
    }

    pub(crate) fn set_force_close(&mut self) {
        self.force_close = true;
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<upgrade::Pending> {
        self.upgrade.take()
    }

    /// Recovers the write half after finalize, for keep-alive reuse or an
    /// upgrade handoff.
    pub(crate) fn into_write_half(mut self) -> Option<WriteHalf<Io>> {
        if let Some(writer) = self.writer.take() {
            if let Sink::Io(io) = writer.into_sink() {
                return Some(io);
            }
        }
        match self.out {
            Out::H1 { io } => io,
            _ => None,
        }
    }

    /// The serialized head and body, for responses driven through the test
    /// factory.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if let Some(writer) = self.writer.take() {
            if let Sink::Buffer(buf) = writer.into_sink() {
                return buf;
            }
        }
        match self.out {
            Out::Test { buf } => buf.unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("header_written", &self.header_written)
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}
