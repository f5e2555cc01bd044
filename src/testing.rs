//! Factories for driving handlers without a socket.
//!
//! A test request carries an in-memory body; a test response captures the
//! serialized head and body, retrievable with
//! [`ServerResponse::into_bytes`].
//!
//! ```
//! use http::{HeaderMap, Method};
//! use wharf::testing::{create_test_request, create_test_response};
//!
//! # async fn run() -> wharf::Result<()> {
//! let mut req = create_test_request(Method::GET, "/", HeaderMap::new(), "");
//! let mut res = create_test_response();
//! res.write_body("hi").await?;
//! # let _ = req.body();
//! let wire = res.into_bytes();
//! assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::request::ServerRequest;
use crate::response::ServerResponse;

/// Creates a request backed by an in-memory body.
pub fn create_test_request(
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: impl Into<Bytes>,
) -> ServerRequest {
    ServerRequest::from_test_parts(method, url.to_string(), headers, body.into())
}

/// Creates a response that captures its wire bytes in memory.
pub fn create_test_response() -> ServerResponse {
    ServerResponse::test()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[tokio::test]
    async fn write_body_shape() {
        let mut res = create_test_response();
        res.write_body("hi").await.unwrap();
        res.finalize().await.unwrap();
        let wire = String::from_utf8(res.into_bytes()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("content-type: text/plain; charset=UTF-8\r\n"));
        assert!(wire.contains("content-length: 2\r\n"));
        assert!(wire.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn status_error_message_on_the_wire() {
        let mut res = create_test_response();
        res.set_status(StatusCode::IM_A_TEAPOT);
        res.write_body("teapot").await.unwrap();
        let wire = String::from_utf8(res.into_bytes()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 418 I'm a teapot\r\n"));
    }

    #[tokio::test]
    async fn redirect_shape() {
        let mut res = create_test_response();
        res.redirect_with_status("http://x/new", StatusCode::MOVED_PERMANENTLY)
            .await
            .unwrap();
        let wire = String::from_utf8(res.into_bytes()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(wire.contains("location: http://x/new\r\n"));
        assert!(wire.ends_with("redirecting..."));
        assert!(wire.contains("content-length: 14\r\n"));
    }

    #[tokio::test]
    async fn json_body_carries_length() {
        let mut res = create_test_response();
        res.write_json_body(&serde_json::json!({"ok": true}))
            .await
            .unwrap();
        let wire = String::from_utf8(res.into_bytes()).unwrap();
        assert!(wire.contains("content-type: application/json; charset=UTF-8\r\n"));
        assert!(wire.contains("content-length: 11\r\n"));
        assert!(wire.ends_with("{\"ok\":true}"));
    }

    #[tokio::test]
    async fn void_body_forbids_framing_headers() {
        let mut res = create_test_response();
        res.set_status(StatusCode::NOT_MODIFIED);
        res.write_void_body().await.unwrap();
        let wire = String::from_utf8(res.into_bytes()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(!wire.contains("transfer-encoding"));
        assert!(!wire.contains("content-length"));

        let mut res = create_test_response();
        res.headers_mut()
            .insert(http::header::CONTENT_LENGTH, "5".parse().unwrap());
        assert!(res.write_void_body().await.is_err());
    }

    #[tokio::test]
    async fn unknown_length_body_switches_to_chunked() {
        let mut res = create_test_response();
        let mut writer_shape = {
            let writer = res.body_writer().await.unwrap();
            writer.write(b"hello").await.unwrap();
            writer.bytes_written()
        };
        res.finalize().await.unwrap();
        writer_shape = writer_shape.max(res.bytes_written());
        let wire = String::from_utf8(res.into_bytes()).unwrap();
        assert!(wire.contains("transfer-encoding: chunked\r\n"));
        assert!(wire.ends_with("5\r\nhello\r\n0\r\n\r\n"));
        // framing counted on the wire
        assert_eq!(writer_shape, 15);
    }

    #[tokio::test]
    async fn mutating_headers_after_write_panics() {
        let mut res = create_test_response();
        res.write_body("x").await.unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            res.set_status(StatusCode::ACCEPTED);
        }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn request_body_readable() {
        let mut req = create_test_request(
            Method::POST,
            "/submit",
            HeaderMap::new(),
            &b"payload"[..],
        );
        let body = req.body().read_to_end(64).await.unwrap();
        assert_eq!(body, b"payload");
    }
}
