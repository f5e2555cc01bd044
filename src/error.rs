//! Error and Result types.

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

/// Result type often returned from methods that can have wharf `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling HTTP connections and requests.
///
/// # Formatting
///
/// The `Display` implementation of this type only prints the details of
/// this level of error, even though it may have been caused by another
/// error and contain that error in its source.
///
/// # Source
///
/// The underlying cause, if any, is exposed type-erased through
/// [`Error::source()`]. The exact types found there are not part of the
/// stable API.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// A malformed request head or body framing.
    Parse(Parse),
    /// A request exceeded a configured size limit.
    TooLarge,
    /// A read deadline elapsed.
    Timeout,
    /// A typed status raised by a handler; the cause is the
    /// [`HttpStatusError`].
    Status,
    /// The connection closed before a message could be completed.
    IncompleteMessage,
    /// An `io::Error` from the underlying transport.
    Io,
    /// The TLS layer rejected the connection.
    Tls,
    /// Invalid listen-time configuration.
    Config,
    /// Error from the HTTP/2 framing layer.
    Http2,
    /// Caller misuse.
    User(User),
}

#[derive(Debug)]
pub(crate) enum Parse {
    Method,
    Version,
    Uri,
    Header,
    ContentLength,
    TransferEncoding,
    Json,
    /// Request head larger than `max_request_header_size`.
    TooLarge,
    /// A single header line longer than the per-line cap.
    LineTooLong,
    /// HTTP/1.1 request without a `Host` header.
    MissingHost,
}

#[derive(Debug)]
pub(crate) enum User {
    /// The handler returned an untyped error.
    Handler,
    /// Body bytes written past the declared `Content-Length`.
    BodyOverrun,
    /// A body operation on a response whose head forbids one.
    UnexpectedBody,
    /// Polled an upgrade that was never armed, or the connection was
    /// dropped before the handoff.
    NoUpgrade,
}

// Sentinel type to indicate the error was caused by a timeout.
#[derive(Debug)]
pub(crate) struct TimedOut;

/// A typed error carrying an HTTP status, raised from request handlers.
///
/// Handlers return this to control the wire status directly: the status is
/// mapped one-to-one onto the response, `message` becomes the visible error
/// text, and `debug_message` is appended to the diagnostic section of the
/// default error page.
#[derive(Debug)]
pub struct HttpStatusError {
    status: StatusCode,
    message: String,
    debug_message: Option<String>,
}

impl HttpStatusError {
    /// Creates a status error with the given status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        HttpStatusError {
            status,
            message: message.into(),
            debug_message: None,
        }
    }

    /// Attaches additional diagnostic text shown only on the error page.
    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug_message = Some(debug.into());
        self
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The user-visible message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The diagnostic text, if any.
    pub fn debug_message(&self) -> Option<&str> {
        self.debug_message.as_deref()
    }
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl StdError for HttpStatusError {}

impl From<HttpStatusError> for Error {
    fn from(err: HttpStatusError) -> Error {
        Error::new(Kind::Status).with(err)
    }
}

impl Error {
    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if a configured size limit was exceeded.
    pub fn is_too_large(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::TooLarge | Kind::Parse(Parse::TooLarge) | Kind::Parse(Parse::LineTooLong)
        )
    }

    /// Returns true if the error was caused by a timeout.
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::Timeout) {
            return true;
        }
        self.find_source::<TimedOut>().is_some()
    }

    /// Returns true if this error carries a handler-supplied status.
    pub fn is_status(&self) -> bool {
        matches!(self.inner.kind, Kind::Status)
    }

    /// Returns true if the connection closed before a message completed.
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// Returns true for transport-level I/O errors.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true for listen-time configuration errors.
    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, Kind::Config)
    }

    /// The status code this error projects onto the wire when the response
    /// head has not been written yet.
    pub fn status_code(&self) -> StatusCode {
        match self.inner.kind {
            Kind::Status => self
                .find_source::<HttpStatusError>()
                .map(|e| e.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Kind::Parse(Parse::TooLarge) | Kind::Parse(Parse::LineTooLong) => {
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
            }
            Kind::Parse(_) => StatusCode::BAD_REQUEST,
            Kind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Kind::Timeout => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The handler-supplied status error, if that is what this is.
    pub fn as_status_error(&self) -> Option<&HttpStatusError> {
        if self.is_status() {
            self.find_source::<HttpStatusError>()
        } else {
            None
        }
    }

    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        None
    }

    pub(crate) fn h2_reason(&self) -> h2::Reason {
        // Find an h2::Reason somewhere in the cause stack, if it exists,
        // otherwise assume an INTERNAL_ERROR.
        self.find_source::<h2::Error>()
            .and_then(|h2_err| h2_err.reason())
            .unwrap_or(h2::Reason::INTERNAL_ERROR)
    }

    pub(crate) fn new_parse(parse: Parse) -> Error {
        Error::new(Kind::Parse(parse))
    }

    pub(crate) fn new_too_large() -> Error {
        Error::new(Kind::TooLarge)
    }

    pub(crate) fn new_timeout() -> Error {
        Error::new(Kind::Timeout).with(TimedOut)
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_tls(cause: std::io::Error) -> Error {
        Error::new(Kind::Tls).with(cause)
    }

    pub(crate) fn new_config(msg: &'static str) -> Error {
        Error::new(Kind::Config).with(msg)
    }

    pub(crate) fn new_h2(cause: h2::Error) -> Error {
        if cause.is_io() {
            Error::new_io(cause.into_io().expect("h2::Error::is_io"))
        } else {
            Error::new(Kind::Http2).with(cause)
        }
    }

    pub(crate) fn new_user_handler<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::User(User::Handler)).with(cause)
    }

    pub(crate) fn new_user_body_overrun() -> Error {
        Error::new(Kind::User(User::BodyOverrun))
    }

    pub(crate) fn new_user_unexpected_body() -> Error {
        Error::new(Kind::User(User::UnexpectedBody))
    }

    pub(crate) fn new_user_no_upgrade() -> Error {
        Error::new(Kind::User(User::NoUpgrade))
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Method) => "invalid HTTP method parsed",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::Uri) => "invalid URI",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::ContentLength) => "invalid content-length parsed",
            Kind::Parse(Parse::TransferEncoding) => "invalid transfer-encoding parsed",
            Kind::Parse(Parse::Json) => "invalid JSON request body",
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::Parse(Parse::LineTooLong) => "header line is too long",
            Kind::Parse(Parse::MissingHost) => "request is missing a Host header",
            Kind::TooLarge => "request body exceeds the configured limit",
            Kind::Timeout => "request timed out",
            Kind::Status => "handler raised an HTTP status",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::Io => "connection error",
            Kind::Tls => "TLS handshake failed",
            Kind::Config => "invalid server configuration",
            Kind::Http2 => "http2 error",
            Kind::User(User::Handler) => "error from the request handler",
            Kind::User(User::BodyOverrun) => "body written past the declared content-length",
            Kind::User(User::UnexpectedBody) => "response may not have a body",
            Kind::User(User::NoUpgrade) => "no upgrade available",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("wharf::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Error {
        Error::new_parse(match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header,
            httparse::Error::Status => Parse::Method,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        })
    }
}

impl From<http::method::InvalidMethod> for Error {
    fn from(_: http::method::InvalidMethod) -> Error {
        Error::new_parse(Parse::Method)
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(_: http::uri::InvalidUri) -> Error {
        Error::new_parse(Parse::Uri)
    }
}

// ===== impl TimedOut =====

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn error_satisfies_send_sync() {
        assert_send_sync::<Error>()
    }

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn status_error_projects_verbatim() {
        let err: Error = HttpStatusError::new(StatusCode::IM_A_TEAPOT, "teapot").into();
        assert!(err.is_status());
        assert_eq!(err.status_code(), StatusCode::IM_A_TEAPOT);
        assert_eq!(err.as_status_error().unwrap().message(), "teapot");
    }

    #[test]
    fn parse_errors_project_400_class() {
        assert_eq!(
            Error::new_parse(Parse::MissingHost).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::new_parse(Parse::TooLarge).status_code(),
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
        );
        assert_eq!(Error::new_too_large().status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(Error::new_timeout().status_code(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn h2_reason_nested() {
        let recvd = Error::new_h2(h2::Error::from(h2::Reason::ENHANCE_YOUR_CALM));
        let handler_err = Error::new_user_handler(recvd);
        assert_eq!(handler_err.h2_reason(), h2::Reason::ENHANCE_YOUR_CALM);
    }

    #[test]
    fn timeout_found_through_chain() {
        let err = Error::new_timeout();
        assert!(err.is_timeout());
        assert!(!Error::new_incomplete().is_timeout());
    }
}
