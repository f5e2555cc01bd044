//! Server configuration.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::logging::AccessLogger;
use crate::service::ErrorPageHandler;
use crate::session::SessionStore;

/// Processing options applied to every request of a server context.
///
/// Options form a bitflag set; combine them with `|` and test with
/// [`contains`](ServerOption::contains).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ServerOption(u32);

impl ServerOption {
    /// No processing beyond the protocol itself.
    pub const NONE: ServerOption = ServerOption(0);
    /// Split the request target into path, query, username and password,
    /// URL-decoding the path.
    pub const PARSE_URL: ServerOption = ServerOption(1 << 0);
    /// Parse the query string into form fields (implies `PARSE_URL`).
    pub const PARSE_QUERY_STRING: ServerOption = ServerOption(1 << 1 | 1 << 0);
    /// Drain urlencoded/multipart bodies into form fields and uploads.
    pub const PARSE_FORM_BODY: ServerOption = ServerOption(1 << 2);
    /// Drain `application/json` bodies into a parsed JSON value.
    pub const PARSE_JSON_BODY: ServerOption = ServerOption(1 << 3);
    /// Enable multipart body streaming.
    pub const PARSE_MULTI_PART_BODY: ServerOption = ServerOption(1 << 4);
    /// Parse the `Cookie` header.
    pub const PARSE_COOKIES: ServerOption = ServerOption(1 << 5);
    /// Spread connections across worker tasks.
    pub const DISTRIBUTE: ServerOption = ServerOption(1 << 6);
    /// Include stack traces in error page debug output.
    pub const ERROR_STACK_TRACES: ServerOption = ServerOption(1 << 7);
    /// Refuse HTTP/2, both `h2` (ALPN) and `h2c`.
    pub const DISABLE_HTTP2: ServerOption = ServerOption(1 << 8);
    /// Allow HTTP/2 server push.
    pub const ENABLE_PUSH_REQUESTS: ServerOption = ServerOption(1 << 9);

    /// The default option set.
    pub const DEFAULTS: ServerOption = ServerOption(
        Self::PARSE_URL.0
            | Self::PARSE_QUERY_STRING.0
            | Self::PARSE_FORM_BODY.0
            | Self::PARSE_JSON_BODY.0
            | Self::PARSE_MULTI_PART_BODY.0
            | Self::PARSE_COOKIES.0
            | Self::ERROR_STACK_TRACES.0,
    );

    /// Whether all bits of `other` are set.
    pub fn contains(&self, other: ServerOption) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ServerOption {
    type Output = ServerOption;
    fn bitor(self, other: ServerOption) -> ServerOption {
        ServerOption(self.0 | other.0)
    }
}

impl std::ops::Sub for ServerOption {
    type Output = ServerOption;
    fn sub(self, other: ServerOption) -> ServerOption {
        ServerOption(self.0 & !other.0)
    }
}

impl Default for ServerOption {
    fn default() -> Self {
        Self::DEFAULTS
    }
}

impl fmt::Debug for ServerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerOption({:#b})", self.0)
    }
}

/// Attribute options for session cookies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionOption(u8);

impl SessionOption {
    /// No explicit attributes; `Secure` follows the request's TLS state.
    pub const NONE: SessionOption = SessionOption(0);
    /// Set `HttpOnly` on the session cookie.
    pub const HTTP_ONLY: SessionOption = SessionOption(1 << 0);
    /// Force `Secure` on, regardless of the request transport.
    pub const SECURE: SessionOption = SessionOption(1 << 1);
    /// Force `Secure` off, regardless of the request transport.
    pub const NO_SECURE: SessionOption = SessionOption(1 << 2);

    /// Whether all bits of `other` are set.
    pub fn contains(&self, other: SessionOption) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for SessionOption {
    type Output = SessionOption;
    fn bitor(self, other: SessionOption) -> SessionOption {
        SessionOption(self.0 | other.0)
    }
}

/// Settings for one server context, immutable once passed to
/// [`listen`](crate::listen).
#[derive(Clone)]
pub struct ServerSettings {
    /// Interface addresses to bind. Contexts sharing (address, port) must
    /// have distinct [`host_name`](Self::host_name)s.
    pub bind_addresses: Vec<String>,
    /// TCP port to listen on.
    pub port: u16,
    /// Virtual-host name matched against SNI and `Host`. `None` makes this
    /// the listen-level default context for its (address, port).
    pub host_name: Option<String>,
    /// Request processing options.
    pub options: ServerOption,
    /// Maximum total size of a request head in bytes.
    pub max_request_header_size: usize,
    /// Maximum size of a request body in bytes.
    pub max_request_size: u64,
    /// Maximum wall-clock time for reading one request. Zero disables the
    /// limit.
    pub max_request_time: Duration,
    /// How long an idle keep-alive connection waits for the next request.
    pub keep_alive_timeout: Duration,
    /// TLS configuration; `None` serves cleartext.
    pub tls: Option<Arc<rustls::ServerConfig>>,
    /// Session store; `None` disables sessions.
    pub session_store: Option<Arc<dyn SessionStore>>,
    /// Custom error page renderer.
    pub error_page_handler: Option<Arc<dyn ErrorPageHandler>>,
    /// Access loggers invoked at request finalization.
    pub access_loggers: Vec<Arc<dyn AccessLogger>>,
    /// Value of the `Server` response header.
    pub server_string: String,
    /// Whether to negotiate gzip/deflate response compression.
    pub use_compression: bool,
    /// HTTP/2 `SETTINGS_MAX_CONCURRENT_STREAMS`.
    pub http2_max_concurrent_streams: u32,
    /// HTTP/2 `SETTINGS_MAX_FRAME_SIZE`.
    pub http2_max_frame_size: u32,
    /// Ping interval handed to protocol takers after a WebSocket-style
    /// `101` switch.
    pub web_socket_ping_interval: Option<Duration>,
}

impl ServerSettings {
    /// Settings with the default limits, listening on every interface.
    pub fn new() -> Self {
        ServerSettings {
            bind_addresses: vec!["0.0.0.0".to_string(), "::".to_string()],
            port: 8080,
            host_name: None,
            options: ServerOption::DEFAULTS,
            max_request_header_size: 10 * 1024,
            max_request_size: 2 * 1024 * 1024,
            max_request_time: Duration::ZERO,
            keep_alive_timeout: Duration::from_secs(10),
            tls: None,
            session_store: None,
            error_page_handler: None,
            access_loggers: Vec::new(),
            server_string: concat!("wharf/", env!("CARGO_PKG_VERSION")).to_string(),
            use_compression: false,
            http2_max_concurrent_streams: 200,
            http2_max_frame_size: 16 * 1024,
            web_socket_ping_interval: None,
        }
    }

    pub(crate) fn http2_disabled(&self) -> bool {
        self.options.contains(ServerOption::DISABLE_HTTP2)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("bind_addresses", &self.bind_addresses)
            .field("port", &self.port)
            .field("host_name", &self.host_name)
            .field("options", &self.options)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

// ===== distributed front-end relay =====

static DIST_HOST: OnceLock<Mutex<Option<(String, u16)>>> = OnceLock::new();

fn dist_slot() -> &'static Mutex<Option<(String, u16)>> {
    DIST_HOST.get_or_init(|| Mutex::new(None))
}

/// Routes future [`listen`](crate::listen) calls to a distributed
/// front-end relay instead of binding locally.
///
/// The relay wire protocol is provided by an external front-end; the
/// engine only records the target and skips the local bind.
pub fn set_dist_host(host: impl Into<String>, port: u16) {
    *dist_slot().lock().expect("dist host lock") = Some((host.into(), port));
}

pub(crate) fn dist_host() -> Option<(String, u16)> {
    dist_slot().lock().expect("dist host lock").clone()
}

/// Applies `--disthost=<host>` and `--distport=<port>` from the process
/// arguments, if present.
pub fn apply_dist_args() {
    let mut host = None;
    let mut port = 11000u16;
    for arg in std::env::args() {
        if let Some(h) = arg.strip_prefix("--disthost=") {
            host = Some(h.to_string());
        } else if let Some(p) = arg.strip_prefix("--distport=") {
            if let Ok(p) = p.parse() {
                port = p;
            }
        }
    }
    if let Some(host) = host {
        info!("routing listens through front-end relay {}:{}", host, port);
        set_dist_host(host, port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_parsing_flags() {
        let options = ServerOption::default();
        assert!(options.contains(ServerOption::PARSE_URL));
        assert!(options.contains(ServerOption::PARSE_COOKIES));
        assert!(options.contains(ServerOption::ERROR_STACK_TRACES));
        assert!(!options.contains(ServerOption::DISABLE_HTTP2));
        assert!(!options.contains(ServerOption::DISTRIBUTE));
    }

    #[test]
    fn query_string_implies_url() {
        assert!(ServerOption::PARSE_QUERY_STRING.contains(ServerOption::PARSE_URL));
    }

    #[test]
    fn subtraction_clears_bits() {
        let options = ServerOption::DEFAULTS - ServerOption::PARSE_COOKIES;
        assert!(!options.contains(ServerOption::PARSE_COOKIES));
        assert!(options.contains(ServerOption::PARSE_JSON_BODY));
    }
}
