//! HTTP/1.x integration tests over real localhost sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wharf::{
    handler_fn, listen, static_redirect, HttpHandler, HttpStatusError, Listener,
    MemorySessionStore, ServerRequest, ServerResponse, ServerSettings, SessionOption,
};

fn local_settings() -> ServerSettings {
    let mut settings = ServerSettings::new();
    settings.bind_addresses = vec!["127.0.0.1".to_string()];
    settings.port = 0;
    settings
}

async fn start(settings: ServerSettings, handler: impl HttpHandler) -> (Listener, SocketAddr) {
    let listener = listen(settings, handler).await.expect("listen");
    let addr = listener.bound_addresses()[0];
    (listener, addr)
}

/// Sends raw bytes and reads the whole response until the server closes
/// the connection.
async fn roundtrip(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request).await.expect("send");
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("response before timeout")
        .expect("read response");
    response
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[tokio::test]
async fn simple_get_has_exact_shape() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move { res.write_body("hi").await })
        }),
    )
    .await;

    let response = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("content-type: text/plain; charset=UTF-8\r\n"));
    assert!(response.contains("content-length: 2\r\n"));
    assert!(response.contains("server: wharf/"));
    assert!(response.contains("date: "));
    assert!(response.ends_with("\r\n\r\nhi"));

    listener.stop_listening();
}

#[tokio::test]
async fn chunked_request_body_is_decoded() {
    let mut settings = local_settings();
    // leave the body for the handler
    settings.options = wharf::ServerOption::PARSE_URL | wharf::ServerOption::PARSE_COOKIES;
    let (listener, addr) = start(
        settings,
        handler_fn(|req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move {
                let body = req.body().read_to_end(1024).await?;
                res.write_body(body).await
            })
        }),
    )
    .await;

    let response = roundtrip(
        addr,
        b"POST / HTTP/1.1\r\nHost: h\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
    )
    .await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\nhello"));

    listener.stop_listening();
}

#[tokio::test]
async fn oversize_content_length_is_rejected_before_body() {
    let mut settings = local_settings();
    settings.max_request_size = 1024;
    let (listener, addr) = start(
        settings,
        handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move { res.write_body("never").await })
        }),
    )
    .await;

    // body is never sent; the server must answer from the head alone
    let response = roundtrip(
        addr,
        b"POST /upload HTTP/1.1\r\nHost: h\r\nContent-Length: 99999999\r\n\r\n",
    )
    .await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 413 "), "{response}");

    listener.stop_listening();
}

#[tokio::test]
async fn static_redirect_handler() {
    let (listener, addr) = start(
        local_settings(),
        static_redirect("http://x/new", StatusCode::MOVED_PERMANENTLY),
    )
    .await;

    let response =
        roundtrip(addr, b"GET /old HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"), "{response}");
    assert!(response.contains("location: http://x/new\r\n"));
    assert!(response.ends_with("redirecting..."));

    listener.stop_listening();
}

#[tokio::test]
async fn handler_status_error_maps_verbatim() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|_req: &mut ServerRequest, _res: &mut ServerResponse| {
            Box::pin(async move {
                Err(HttpStatusError::new(StatusCode::IM_A_TEAPOT, "teapot").into())
            })
        }),
    )
    .await;

    let response = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 418 I'm a teapot\r\n"), "{response}");
    assert!(response.contains("teapot"));

    listener.stop_listening();
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move {
                let body = format!("pong:{}", req.path);
                res.write_body(body).await
            })
        }),
    )
    .await;

    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let mut buf = vec![0u8; 4096];
    for path in ["/one", "/two"] {
        let request = format!("GET {path} HTTP/1.1\r\nHost: h\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("send");

        let mut collected = String::new();
        let expected = format!("pong:{path}");
        while !collected.contains(&expected) {
            let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
                .await
                .expect("no timeout")
                .expect("read");
            assert!(n > 0, "connection closed early: {collected}");
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert!(collected.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(collected.contains("keep-alive: timeout="));
    }

    listener.stop_listening();
}

#[tokio::test]
async fn head_response_has_no_body() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move { res.write_body("hello").await })
        }),
    )
    .await;

    let response =
        roundtrip(addr, b"HEAD / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("content-length: 5\r\n"));
    assert!(response.ends_with("\r\n\r\n"), "unexpected body bytes: {response}");

    listener.stop_listening();
}

#[tokio::test]
async fn silent_handler_produces_404() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|_req: &mut ServerRequest, _res: &mut ServerResponse| {
            Box::pin(async move { Ok(()) })
        }),
    )
    .await;

    let response = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
    assert!(response.contains("404 - Not Found"));

    listener.stop_listening();
}

#[tokio::test]
async fn missing_host_is_bad_request() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move { res.write_body("hi").await })
        }),
    )
    .await;

    let response = roundtrip(addr, b"GET / HTTP/1.1\r\n\r\n").await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 400 "), "{response}");

    listener.stop_listening();
}

#[tokio::test]
async fn compression_negotiates_in_client_order() {
    let mut settings = local_settings();
    settings.use_compression = true;
    let (listener, addr) = start(
        settings,
        handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move { res.write_body("squeeze me squeeze me squeeze me").await })
        }),
    )
    .await;

    let response = roundtrip(
        addr,
        b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\nAccept-Encoding: deflate, gzip\r\n\r\n",
    )
    .await;
    let response_text = text(&response);
    // client priority order, not server preference
    assert!(response_text.contains("content-encoding: deflate\r\n"), "{response_text}");
    assert!(!response_text.contains("content-length:"));
    assert!(response_text.contains("transfer-encoding: chunked\r\n"));

    // un-chunk, then inflate, and compare
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("head end");
    let mut body = &response[split + 4..];
    let mut compressed = Vec::new();
    loop {
        let pos = body.windows(2).position(|w| w == b"\r\n").expect("chunk size line");
        let size =
            usize::from_str_radix(std::str::from_utf8(&body[..pos]).expect("hex"), 16).expect("size");
        body = &body[pos + 2..];
        if size == 0 {
            break;
        }
        compressed.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
    let mut decoder = flate2::read::ZlibDecoder::new(&compressed[..]);
    let mut plain = Vec::new();
    std::io::Read::read_to_end(&mut decoder, &mut plain).expect("valid zlib");
    assert_eq!(plain, b"squeeze me squeeze me squeeze me");

    listener.stop_listening();
}

#[tokio::test]
async fn session_round_trip() {
    let store = Arc::new(MemorySessionStore::new());
    let mut settings = local_settings();
    settings.session_store = Some(store.clone());
    let (listener, addr) = start(
        settings,
        handler_fn(|req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move {
                match req.session() {
                    Some(session) => {
                        let user = session.get("user").unwrap_or_default();
                        res.write_body(format!("welcome back {user}")).await
                    }
                    None => {
                        let session =
                            res.start_session("/", SessionOption::HTTP_ONLY)?;
                        session.set("user", "alice");
                        res.write_body("fresh session").await
                    }
                }
            })
        }),
    )
    .await;

    let first = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    let first = text(&first);
    assert!(first.ends_with("fresh session"), "{first}");
    let cookie_start = first
        .find("set-cookie: wharf.session_id=")
        .expect("session cookie emitted")
        + "set-cookie: wharf.session_id=".len();
    let session_id = &first[cookie_start..cookie_start + 32];
    assert!(first.contains("HttpOnly"));

    let request = format!(
        "GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\nCookie: wharf.session_id={session_id}\r\n\r\n"
    );
    let second = roundtrip(addr, request.as_bytes()).await;
    let second = text(&second);
    assert!(second.ends_with("welcome back alice"), "{second}");

    listener.stop_listening();
}

#[tokio::test]
async fn form_body_is_parsed_before_handler() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move {
                let name = req
                    .form
                    .iter()
                    .find(|(k, _)| k == "name")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                res.write_body(format!("hello {name}")).await
            })
        }),
    )
    .await;

    let response = roundtrip(
        addr,
        b"POST / HTTP/1.1\r\nHost: h\r\nConnection: close\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 14\r\n\r\nname=ferris%21",
    )
    .await;
    let response = text(&response);
    assert!(response.ends_with("hello ferris!"), "{response}");

    listener.stop_listening();
}

#[tokio::test]
async fn h2c_upgrade_request_is_served_over_http1() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move { res.write_body("plain").await })
        }),
    )
    .await;

    let response = roundtrip(
        addr,
        b"GET / HTTP/1.1\r\nHost: h\r\nConnection: Upgrade, HTTP2-Settings, close\r\nUpgrade: h2c\r\nHTTP2-Settings: AAMAAABkAARAAAAAAAIAAAAA\r\n\r\n",
    )
    .await;
    let response = text(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("plain"));

    listener.stop_listening();
}

#[tokio::test]
async fn protocol_switch_hands_over_the_connection() {
    let (listener, addr) = start(
        local_settings(),
        handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
            Box::pin(async move {
                let on_upgrade = res.switch_protocol("echo").await?;
                tokio::spawn(async move {
                    let Ok(mut upgraded) = on_upgrade.await else { return };
                    let mut buf = [0u8; 64];
                    while let Ok(n) = upgraded.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        if upgraded.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(())
            })
        }),
    )
    .await;

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: h\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n")
        .await
        .expect("send");

    let mut collected = String::new();
    let mut buf = vec![0u8; 1024];
    while !collected.contains("\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("no timeout")
            .expect("read");
        assert!(n > 0);
        collected.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(collected.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{collected}");
    assert!(collected.to_ascii_lowercase().contains("upgrade: echo"));

    // the raw protocol now owns the socket
    stream.write_all(b"marco").await.expect("send raw");
    let mut echo = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut echo))
        .await
        .expect("no timeout")
        .expect("echo");
    assert_eq!(&echo, b"marco");

    listener.stop_listening();
}
