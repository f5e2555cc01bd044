//! TLS acceptance: ALPN policy and SNI-dispatched configuration.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::registry;
use crate::server::ListenInfo;
use crate::Error;

/// Installs the engine's ALPN preference on a TLS configuration, unless
/// the caller already chose their own protocol list (which opts the
/// context out of HTTP/2 negotiation).
pub(crate) fn apply_alpn(config: &mut rustls::ServerConfig, http2_enabled: bool) {
    if !config.alpn_protocols.is_empty() {
        return;
    }
    if http2_enabled {
        config.alpn_protocols = vec![
            b"h2".to_vec(),
            b"h2-16".to_vec(),
            b"h2-14".to_vec(),
            b"http/1.1".to_vec(),
        ];
    } else {
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
    }
}

/// Whether the first bytes of a connection are a plausible TLS
/// ClientHello: a handshake record (`0x16`), TLS major version 3, and a
/// ClientHello handshake type.
pub(crate) fn looks_like_client_hello(prefix: &[u8]) -> bool {
    prefix.len() >= 6 && prefix[0] == 0x16 && prefix[1] == 0x03 && prefix[5] == 0x01
}

/// Accepts a TLS connection, resolving the server configuration from the
/// context registry once the ClientHello (and so the SNI name) is
/// available. An unmatched server name aborts the handshake.
pub(crate) async fn accept<T>(io: T, listen: &ListenInfo) -> crate::Result<TlsStream<T>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), io);
    let start = acceptor.await.map_err(Error::new_tls)?;

    let server_name = start.client_hello().server_name().map(str::to_string);
    let config = registry::resolve_sni(&listen.address, listen.port, server_name.as_deref())
        .ok_or_else(|| {
            debug!(
                "aborting TLS handshake: no context for server name {:?}",
                server_name
            );
            Error::new_config("no TLS context matches the presented server name")
        })?;

    start.into_stream(config).await.map_err(Error::new_tls)
}
