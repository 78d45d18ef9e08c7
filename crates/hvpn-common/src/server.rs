//! Shared accept loop serving an axum application over plain TCP or TLS.
//!
//! Every service runs behind this loop so they share connection limits,
//! header and handshake timeouts, peer address injection and draining.

use crate::config::{ServeConfig, TlsPaths};
use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while setting up or running the listener.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The certificate or key was rejected by rustls.
    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),
    /// The key file contained no usable private key.
    #[error("no private key found in {0}")]
    MissingKey(PathBuf),
    /// The certificate file contained no certificates.
    #[error("no certificates found in {0}")]
    MissingCert(PathBuf),
}

/// Builds a TLS acceptor from PEM files.
///
/// # Errors
///
/// Returns an error if either file is unreadable or rejected by rustls.
pub fn load_tls(paths: &TlsPaths) -> Result<TlsAcceptor, ServeError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&paths.cert)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ServeError::MissingCert(paths.cert.clone()));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&paths.key)?))?
        .ok_or_else(|| ServeError::MissingKey(paths.key.clone()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    // WebSocket upgrades need HTTP/1.1.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Decrements the live connection count when the last holder lets go.
struct ConnGuard {
    active: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.drained.notify_one();
    }
}

/// A connection's place in the `max_conns` budget, attached to every request
/// as an extension. A handler that takes over the socket through an upgrade
/// keeps the connection counted for as long as it holds the slot.
#[derive(Clone)]
pub struct ConnectionSlot(Arc<ConnGuard>);

/// Serve `app` on `listener` until the process ends.
///
/// # Errors
///
/// Returns an error if TLS material cannot be loaded or the listener fails.
pub async fn serve(listener: TcpListener, app: Router, config: &ServeConfig) -> Result<(), ServeError> {
    serve_with_shutdown(listener, app, config, std::future::pending()).await
}

/// Serve `app` on `listener` until `signal` resolves.
///
/// After the signal the loop stops accepting, asks open connections to
/// finish their current request and waits up to 30 seconds for them.
/// Upgraded connections count until their handler drops its
/// [`ConnectionSlot`].
///
/// # Errors
///
/// Returns an error if TLS material cannot be loaded or the listener fails.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    app: Router,
    config: &ServeConfig,
    signal: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send,
{
    let tls = config.tls.as_ref().map(load_tls).transpose()?;
    let local_addr = listener.local_addr()?;
    info!(
        "listening on {} ({})",
        local_addr,
        if tls.is_some() { "tls" } else { "plain" }
    );

    let active = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(Notify::new());
    let (closing_tx, closing_rx) = watch::channel(false);
    tokio::pin!(signal);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        continue;
                    }
                };
                if active.load(Ordering::Acquire) >= config.max_conns {
                    warn!("max connections reached, rejecting {}", peer);
                    drop(stream);
                    continue;
                }
                active.fetch_add(1, Ordering::AcqRel);
                let slot = ConnectionSlot(Arc::new(ConnGuard {
                    active: Arc::clone(&active),
                    drained: Arc::clone(&drained),
                }));
                let app = app.clone();
                let tls = tls.clone();
                let header_timeout = config.header_timeout;
                let handshake_timeout = config.tls_handshake_timeout;
                let closing = closing_rx.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => {
                            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                                Ok(Ok(tls_stream)) => {
                                    serve_connection(tls_stream, peer, slot, app, header_timeout, closing).await;
                                }
                                Ok(Err(e)) => debug!(peer = %peer, "tls handshake failed: {}", e),
                                Err(_) => debug!(peer = %peer, "tls handshake timed out"),
                            }
                        }
                        None => serve_connection(stream, peer, slot, app, header_timeout, closing).await,
                    }
                });
            }
            () = &mut signal => {
                info!(
                    "shutdown signal received, draining {} connections",
                    active.load(Ordering::Acquire)
                );
                break;
            }
        }
    }

    let _ = closing_tx.send(true);
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while active.load(Ordering::Acquire) > 0 {
        if tokio::time::timeout_at(deadline, drained.notified())
            .await
            .is_err()
        {
            warn!(
                "drain timeout reached with {} connections still active",
                active.load(Ordering::Acquire)
            );
            break;
        }
    }

    info!("server shut down gracefully");
    Ok(())
}

async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    slot: ConnectionSlot,
    app: Router,
    header_timeout: Duration,
    mut closing: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let svc = tower::ServiceExt::<Request<Incoming>>::map_request(
        app,
        move |mut req: Request<Incoming>| {
            req.extensions_mut().insert(ConnectInfo(peer));
            req.extensions_mut().insert(slot.clone());
            req
        },
    );

    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(header_timeout);

    let conn =
        builder.serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(svc));
    tokio::pin!(conn);
    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = closing.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(e) = result {
        debug!(peer = %peer, "connection closed: {}", e);
    }
}
