//! Access logging.
//!
//! Loggers attached to a context run once per request, after
//! finalization, with the finished request/response pair. Formatting
//! beyond the built-in common-log shape belongs to external formatter
//! crates; the engine only defines the invocation point.

use std::io::Write;
use std::sync::Mutex;

use crate::request::ServerRequest;
use crate::response::ServerResponse;

/// Receives every finalized (request, response) pair of a context.
pub trait AccessLogger: Send + Sync + 'static {
    /// Logs one finished request.
    fn log(&self, req: &ServerRequest, res: &ServerResponse);
}

impl std::fmt::Debug for dyn AccessLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessLogger")
    }
}

/// Writes NCSA common-log-style lines to a sink.
///
/// ```text
/// 192.0.2.7 - - [Sat, 02 Aug 2026 10:00:00 GMT] "GET /index HTTP/1.1" 200 512
/// ```
pub struct CommonLogLogger {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl CommonLogLogger {
    /// Creates a logger writing to the given sink.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        CommonLogLogger {
            sink: Mutex::new(Box::new(sink)),
        }
    }
}

impl AccessLogger for CommonLogLogger {
    fn log(&self, req: &ServerRequest, res: &ServerResponse) {
        let line = format!(
            "{} - - [{}] \"{} {} {:?}\" {} {}",
            req.peer_addr().ip(),
            httpdate::fmt_http_date(req.time_created()),
            req.method(),
            req.request_url(),
            req.version(),
            res.status_code().as_u16(),
            res.bytes_written(),
        );
        let mut sink = self.sink.lock().expect("log sink lock");
        let _ = writeln!(sink, "{line}");
        let _ = sink.flush();
    }
}

impl std::fmt::Debug for CommonLogLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CommonLogLogger")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn common_log_line_shape() {
        let buf = SharedBuf::default();
        let logger = CommonLogLogger::new(buf.clone());

        let req = crate::testing::create_test_request(
            http::Method::GET,
            "/hello",
            http::HeaderMap::new(),
            bytes::Bytes::new(),
        );
        let res = crate::testing::create_test_response();
        logger.log(&req, &res);

        let line = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(line.starts_with("127.0.0.1 - - ["));
        assert!(line.contains("\"GET /hello HTTP/1.1\" 200 0"));
    }
}
