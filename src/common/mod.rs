pub(crate) mod date;
pub(crate) mod rewind;

use tokio::io::{AsyncRead, AsyncWrite};

/// Object-safe alias for the transport streams the engine drives: plain
/// TCP, TLS, or a rewind-wrapped variant of either.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> IoStream for T {}

pub(crate) type Io = Box<dyn IoStream>;
