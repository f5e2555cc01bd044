//! HTTP protocol implementations.
//!
//! `h1` owns the HTTP/1.x head codec and per-connection request loop; `h2`
//! adapts sessions of the HTTP/2 framing layer onto the same dispatch
//! path.

pub(crate) mod h1;
pub(crate) mod h2;
