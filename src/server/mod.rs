//! The listen entry point and listener supervision.
//!
//! One TCP listener is opened per distinct (address, port) across all
//! registered contexts; contexts arriving later reuse it. Deregistering a
//! context stops every listener no other context still references.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::registry;
use crate::service::HttpHandler;
use crate::settings::{self, ServerSettings};
use crate::Error;

pub(crate) mod conn;
pub(crate) mod tls;

/// The bind key a connection was accepted under; carried to the drivers so
/// registry lookups use the listener's own (address, port).
#[derive(Debug)]
pub(crate) struct ListenInfo {
    pub(crate) address: String,
    pub(crate) port: u16,
    pub(crate) tls: bool,
}

struct ListenerEntry {
    address: String,
    port: u16,
    local: SocketAddr,
    shutdown: watch::Sender<bool>,
}

static LISTENERS: OnceLock<Mutex<Vec<ListenerEntry>>> = OnceLock::new();

fn listeners() -> &'static Mutex<Vec<ListenerEntry>> {
    LISTENERS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Registers a server context and starts listening on its bind addresses.
///
/// Contexts sharing an (address, port) pair must carry distinct
/// [`host_name`](ServerSettings::host_name)s; requests are routed between
/// them by SNI during the TLS handshake and by `Host` after parsing.
///
/// With `port` 0, an ephemeral port is chosen once and shared by all bind
/// addresses; [`Listener::bound_addresses`] reports it.
pub async fn listen(
    mut settings: ServerSettings,
    handler: impl HttpHandler,
) -> crate::Result<Listener> {
    if settings.bind_addresses.is_empty() {
        return Err(Error::new_config("no bind addresses configured"));
    }

    if let Some(tls) = settings.tls.take() {
        let mut config = (*tls).clone();
        tls::apply_alpn(&mut config, !settings.http2_disabled());
        settings.tls = Some(Arc::new(config));
    }

    // The relay front-end, when configured, owns all sockets; the context
    // is only registered so inbound relayed requests resolve to it.
    if let Some((host, port)) = settings::dist_host() {
        let settings = Arc::new(settings);
        let context = registry::register(settings, Arc::new(handler))?;
        info!(
            "context {} registered with front-end relay {}:{}",
            context.id, host, port
        );
        return Ok(Listener {
            context_id: context.id,
            bound: Vec::new(),
        });
    }

    // An ephemeral port is resolved before registration so every context
    // and listener agrees on the final bind key.
    let mut prebound = None;
    if settings.port == 0 {
        let first = settings.bind_addresses[0].clone();
        let listener = TcpListener::bind((first.as_str(), 0))
            .await
            .map_err(Error::new_io)?;
        let local = listener.local_addr().map_err(Error::new_io)?;
        settings.port = local.port();
        prebound = Some((first, listener, local));
    }

    let tls_bound = settings.tls.is_some();
    let port = settings.port;
    let settings = Arc::new(settings);
    let context = registry::register(settings.clone(), Arc::new(handler))?;

    let mut bound = Vec::new();
    for address in &settings.bind_addresses {
        let pre = if prebound.as_ref().map(|(a, ..)| a == address).unwrap_or(false) {
            prebound.take().map(|(_, listener, local)| (listener, local))
        } else {
            None
        };
        match ensure_listener(address, port, tls_bound, pre).await {
            Ok(local) => bound.push(local),
            Err(e) => warn!("failed to listen on {}:{}: {}", address, port, e),
        }
    }

    if bound.is_empty() {
        registry::deregister(context.id);
        return Err(Error::new_config("could not bind any listen address"));
    }

    info!(
        "listening for {} requests on {:?} (context {})",
        if tls_bound { "HTTPS" } else { "HTTP" },
        bound,
        context.id
    );

    Ok(Listener {
        context_id: context.id,
        bound,
    })
}

async fn ensure_listener(
    address: &str,
    port: u16,
    tls: bool,
    prebound: Option<(TcpListener, SocketAddr)>,
) -> crate::Result<SocketAddr> {
    if let Some(entry) = listeners()
        .lock()
        .expect("listener lock")
        .iter()
        .find(|e| e.address == address && e.port == port)
    {
        return Ok(entry.local);
    }

    let (listener, local) = match prebound {
        Some(pre) => pre,
        None => {
            let listener = TcpListener::bind((address, port))
                .await
                .map_err(Error::new_io)?;
            let local = listener.local_addr().map_err(Error::new_io)?;
            (listener, local)
        }
    };

    let (shutdown, shutdown_rx) = watch::channel(false);
    let info = Arc::new(ListenInfo {
        address: address.to_string(),
        port,
        tls,
    });
    tokio::spawn(accept_loop(listener, shutdown_rx, info));

    listeners().lock().expect("listener lock").push(ListenerEntry {
        address: address.to_string(),
        port,
        local,
        shutdown,
    });
    Ok(local)
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    info: Arc<ListenInfo>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("listener on {}:{} stopping", info.address, info.port);
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!("accepted connection from {}", peer);
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(conn::serve_connection(stream, info.clone()));
                }
                Err(e) => debug!("accept error on {}:{}: {}", info.address, info.port, e),
            }
        }
    }
}

/// A handle to a registered server context.
///
/// Dropping the handle does not stop the server; call
/// [`stop_listening`](Self::stop_listening).
#[derive(Debug)]
pub struct Listener {
    context_id: usize,
    bound: Vec<SocketAddr>,
}

impl Listener {
    /// The local addresses actually bound (relevant with port 0).
    pub fn bound_addresses(&self) -> &[SocketAddr] {
        &self.bound
    }

    /// Deregisters the context and stops every listener no remaining
    /// context references. In-flight connections finish on their own
    /// tasks.
    pub fn stop_listening(&self) {
        for (address, port) in registry::deregister(self.context_id) {
            let mut guard = listeners().lock().expect("listener lock");
            if let Some(pos) = guard
                .iter()
                .position(|e| e.address == address && e.port == port)
            {
                let entry = guard.remove(pos);
                let _ = entry.shutdown.send(true);
            }
        }
    }
}
