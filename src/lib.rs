#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # wharf
//!
//! wharf is an embeddable, asynchronous HTTP server engine.
//!
//! It accepts TCP (optionally TLS) connections and, for each accepted
//! connection, negotiates one of HTTP/1.0, HTTP/1.1 or HTTP/2 — via ALPN on
//! TLS, or via the HTTP/2 connection-preface sniff over cleartext — and
//! dispatches every received request to a user-supplied handler together
//! with a response object the handler writes into.
//!
//! ## Features
//!
//! - HTTP/1 keep-alive, chunked bodies, `Expect: 100-continue`, protocol
//!   upgrades (`101 Switching Protocols` handoff)
//! - HTTP/2 via the `h2` framing layer, selected by ALPN or preface
//! - Virtual hosting: multiple server contexts may share one port, routed
//!   by SNI during the TLS handshake and by `Host` after parsing
//! - Response compression (gzip/deflate), negotiated in client priority
//!   order
//! - Cookie and session lifecycle
//!
//! ## Quick start
//!
//! ```no_run
//! use wharf::{handler_fn, listen, ServerRequest, ServerResponse, ServerSettings};
//!
//! # async fn run() -> wharf::Result<()> {
//! let mut settings = ServerSettings::new();
//! settings.port = 8080;
//!
//! let listener = listen(
//!     settings,
//!     handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
//!         Box::pin(async move { res.write_body("hello world").await })
//!     }),
//! )
//! .await?;
//! # drop(listener);
//! # Ok(())
//! # }
//! ```
//!
//! wharf is a lower-level building block: it does not route URLs, serve
//! static files, or persist request bodies. Handlers receive the raw
//! [`ServerRequest`] and [`ServerResponse`] pair and decide everything
//! above the protocol layer themselves.

#[doc(hidden)]
pub use http;

pub use crate::error::{Error, HttpStatusError, Result};

#[macro_use]
mod trace;

mod body;
mod common;
/// Cookie parsing and serialization.
pub mod cookie;
mod dispatch;
mod error;
mod headers;
/// Access logging invoked at request finalization.
pub mod logging;
mod multipart;
mod proto;
mod registry;
mod request;
mod response;
/// The listen/dispatch loop and listener supervision.
pub mod server;
mod service;
/// Session stores and the per-request session handle.
pub mod session;
mod settings;
/// Factories for driving handlers without a socket.
pub mod testing;
/// Connection handoff after `101 Switching Protocols`.
pub mod upgrade;

pub use crate::body::{BodyReader, BodyWriter};
pub use crate::cookie::{Cookie, CookieJar};
pub use crate::logging::{AccessLogger, CommonLogLogger};
pub use crate::request::{ServerRequest, UploadedFile};
pub use crate::response::ServerResponse;
pub use crate::server::{listen, Listener};
pub use crate::service::{
    handler_fn, static_redirect, BoxFuture, ErrorInfo, ErrorPageHandler, HandlerFn, HttpHandler,
    StaticRedirect,
};
pub use crate::session::{MemorySessionStore, Session, SessionStore};
pub use crate::settings::{
    apply_dist_args, set_dist_host, ServerOption, ServerSettings, SessionOption,
};
