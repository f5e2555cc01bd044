//! The process-wide server context registry.
//!
//! Registered contexts are published as immutable snapshots: readers clone
//! an `Arc` and iterate without holding any lock, writers copy-append and
//! publish a replacement snapshot under the single registry lock. The
//! registry is consulted on three paths: listen-level context resolution
//! when a connection arrives, SNI lookup during the TLS handshake, and
//! virtual-host re-resolution after the `Host` header is parsed.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::service::HttpHandler;
use crate::settings::ServerSettings;

pub(crate) type Snapshot = Arc<Vec<Arc<ServerContext>>>;

/// One registered server: settings plus handler, tagged with a
/// monotonically assigned id.
pub(crate) struct ServerContext {
    pub(crate) id: usize,
    pub(crate) settings: Arc<ServerSettings>,
    pub(crate) handler: Arc<dyn HttpHandler>,
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ServerContext {
    fn binds(&self, address: &str, port: u16) -> bool {
        self.settings.port == port
            && self
                .settings
                .bind_addresses
                .iter()
                .any(|a| a == address)
    }
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
static CONTEXTS: OnceLock<RwLock<Snapshot>> = OnceLock::new();

fn contexts() -> &'static RwLock<Snapshot> {
    CONTEXTS.get_or_init(|| RwLock::new(Arc::new(Vec::new())))
}

pub(crate) fn snapshot() -> Snapshot {
    contexts().read().expect("registry lock").clone()
}

/// Registers a context, validating it against the contexts already bound
/// to any shared (address, port).
pub(crate) fn register(
    settings: Arc<ServerSettings>,
    handler: Arc<dyn HttpHandler>,
) -> crate::Result<Arc<ServerContext>> {
    let mut guard = contexts().write().expect("registry lock");

    for existing in guard.iter() {
        for address in &settings.bind_addresses {
            if !existing.binds(address, settings.port) {
                continue;
            }
            if existing.settings.host_name == settings.host_name {
                return Err(crate::Error::new_config(
                    "a context with the same host name is already bound to this address and port",
                ));
            }
            if existing.settings.tls.is_some() != settings.tls.is_some() {
                return Err(crate::Error::new_config(
                    "cannot mix TLS and cleartext contexts on one address and port",
                ));
            }
            // A shared TLS port dispatches by SNI; a context without a host
            // name would silently swallow every unmatched server name, so
            // the mix is rejected instead of down-promoted.
            if settings.tls.is_some()
                && existing.settings.host_name.is_none() != settings.host_name.is_none()
            {
                return Err(crate::Error::new_config(
                    "TLS contexts sharing an address and port must all carry host names for SNI dispatch",
                ));
            }
        }
    }

    let context = Arc::new(ServerContext {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        settings,
        handler,
    });

    let mut next = Vec::with_capacity(guard.len() + 1);
    next.extend(guard.iter().cloned());
    next.push(context.clone());
    *guard = Arc::new(next);

    Ok(context)
}

/// Removes a context and reports the (address, port) pairs that no longer
/// have any context bound, so the supervisor can stop their listeners.
pub(crate) fn deregister(id: usize) -> Vec<(String, u16)> {
    let mut guard = contexts().write().expect("registry lock");

    let removed: Vec<(String, u16)> = guard
        .iter()
        .find(|c| c.id == id)
        .map(|c| {
            c.settings
                .bind_addresses
                .iter()
                .map(|a| (a.clone(), c.settings.port))
                .collect()
        })
        .unwrap_or_default();

    let next: Vec<Arc<ServerContext>> = guard.iter().filter(|c| c.id != id).cloned().collect();
    *guard = Arc::new(next);

    removed
        .into_iter()
        .filter(|(address, port)| !guard.iter().any(|c| c.binds(address, *port)))
        .collect()
}

/// The listen-level context for a connection: the first context bound to
/// the listener's (address, port).
pub(crate) fn listen_context(address: &str, port: u16) -> Option<Arc<ServerContext>> {
    snapshot()
        .iter()
        .find(|c| c.binds(address, port))
        .cloned()
}

/// Virtual-host resolution after `Host` parsing. Prefers a context whose
/// host name matches; a context carrying an explicit port in its host name
/// never matches a bare host.
pub(crate) fn resolve_virtual_host(
    address: &str,
    port: u16,
    host: &str,
    explicit_port: Option<u16>,
) -> Option<Arc<ServerContext>> {
    let snapshot = snapshot();
    let candidates = snapshot.iter().filter(|c| c.binds(address, port));

    for context in candidates {
        let Some(ref name) = context.settings.host_name else {
            continue;
        };
        if name.eq_ignore_ascii_case(host) {
            return Some(context.clone());
        }
        // "example.com:8080" style context names match host + explicit port
        if let Some(explicit) = explicit_port {
            if let Some((ctx_host, ctx_port)) = name.rsplit_once(':') {
                if ctx_host.eq_ignore_ascii_case(host)
                    && ctx_port.parse::<u16>().ok() == Some(explicit)
                {
                    return Some(context.clone());
                }
            }
        }
    }
    None
}

/// SNI resolution during the TLS handshake: a context whose host name
/// matches the presented server name, falling back to a context without a
/// host name. `None` aborts the handshake.
pub(crate) fn resolve_sni(
    address: &str,
    port: u16,
    server_name: Option<&str>,
) -> Option<Arc<rustls::ServerConfig>> {
    let snapshot = snapshot();
    let mut fallback = None;

    for context in snapshot.iter().filter(|c| c.binds(address, port)) {
        let Some(ref tls) = context.settings.tls else {
            continue;
        };
        match (&context.settings.host_name, server_name) {
            (Some(name), Some(sni)) if name.eq_ignore_ascii_case(sni) => {
                return Some(tls.clone());
            }
            (None, _) => fallback = fallback.or_else(|| Some(tls.clone())),
            _ => {}
        }
    }
    fallback
}
