//! The handler abstraction dispatched for every request.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use http::StatusCode;

use crate::request::ServerRequest;
use crate::response::ServerResponse;

/// A boxed future tied to the borrow of its request/response pair.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An asynchronous request handler.
///
/// Handlers receive the parsed request and a live response writer. A
/// handler that returns without writing anything produces the engine's
/// default `404 Not Found`. Returning an [`HttpStatusError`] maps the
/// status verbatim onto the wire; any other error maps to `500`.
///
/// [`HttpStatusError`]: crate::HttpStatusError
pub trait HttpHandler: Send + Sync + 'static {
    /// Handles one request.
    fn handle<'a>(
        &'a self,
        req: &'a mut ServerRequest,
        res: &'a mut ServerResponse,
    ) -> BoxFuture<'a, crate::Result<()>>;
}

/// Wraps a closure as an [`HttpHandler`].
///
/// The closure receives the request/response pair by mutable reference and
/// returns a boxed future:
///
/// ```
/// use wharf::{handler_fn, ServerRequest, ServerResponse};
///
/// let handler = handler_fn(|_req: &mut ServerRequest, res: &mut ServerResponse| {
///     Box::pin(async move { res.write_body("hello").await })
/// });
/// # drop(handler);
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut ServerRequest, &'a mut ServerResponse) -> BoxFuture<'a, crate::Result<()>>
        + Send
        + Sync
        + 'static,
{
    HandlerFn { f }
}

/// An [`HttpHandler`] created from a closure, returned by [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HttpHandler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut ServerRequest, &'a mut ServerResponse) -> BoxFuture<'a, crate::Result<()>>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        req: &'a mut ServerRequest,
        res: &'a mut ServerResponse,
    ) -> BoxFuture<'a, crate::Result<()>> {
        (self.f)(req, res)
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn")
    }
}

/// A handler that unconditionally redirects to a fixed URL.
pub fn static_redirect(url: impl Into<String>, status: StatusCode) -> StaticRedirect {
    StaticRedirect {
        url: url.into(),
        status,
    }
}

/// The handler returned by [`static_redirect`].
#[derive(Debug)]
pub struct StaticRedirect {
    url: String,
    status: StatusCode,
}

impl HttpHandler for StaticRedirect {
    fn handle<'a>(
        &'a self,
        _req: &'a mut ServerRequest,
        res: &'a mut ServerResponse,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move { res.redirect_with_status(&self.url, self.status).await })
    }
}

/// The information handed to an [`ErrorPageHandler`].
#[derive(Debug)]
pub struct ErrorInfo {
    /// The projected status code.
    pub status: StatusCode,
    /// The user-visible message.
    pub message: String,
    /// Diagnostic text (error chain, optional stack trace); UTF-8
    /// sanitized.
    pub debug: String,
}

/// Renders custom error pages in place of the engine's plaintext default.
///
/// Invoked whenever an error is projected onto a response whose head has
/// not been written yet. The handler must write the response body itself;
/// status and headers are pre-populated.
pub trait ErrorPageHandler: Send + Sync + 'static {
    /// Renders the error page.
    fn handle<'a>(
        &'a self,
        req: &'a mut ServerRequest,
        res: &'a mut ServerResponse,
        error: &'a ErrorInfo,
    ) -> BoxFuture<'a, crate::Result<()>>;
}

impl fmt::Debug for dyn ErrorPageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorPageHandler")
    }
}
