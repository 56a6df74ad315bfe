//! Listener tasks
//!
//! One task per bound socket. Each task owns its connections in a
//! `JoinSet`, so aborting the listener task aborts every connection it
//! accepted.

use crate::error::SeederError;
use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

/// How long a client gets to complete the TLS handshake
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Which configured listener a socket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Insecure,
    Secure,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Insecure => f.write_str("insecure"),
            ListenerKind::Secure => f.write_str("secure"),
        }
    }
}

/// A bound socket ready to be served
pub(crate) struct BoundListener {
    pub kind: ListenerKind,
    pub addr: SocketAddr,
    pub listener: TcpListener,
    pub tls: Option<TlsAcceptor>,
}

pub(crate) async fn bind(kind: ListenerKind, addr: SocketAddr, tls: Option<TlsAcceptor>) -> crate::Result<BoundListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| SeederError::Bind { addr, source })?;
    let addr = listener
        .local_addr()
        .map_err(|source| SeederError::Bind { addr, source })?;
    Ok(BoundListener {
        kind,
        addr,
        listener,
        tls,
    })
}

/// Accept and serve connections until `shutdown` turns true, then drain
pub(crate) async fn serve(
    bound: BoundListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
    errors: mpsc::UnboundedSender<SeederError>,
) {
    let BoundListener {
        kind,
        addr,
        listener,
        tls,
    } = bound;
    info!(%kind, %addr, tls = tls.is_some(), "Listener started");

    let mut connections = JoinSet::new();
    let stopping = stopped(shutdown.clone());
    tokio::pin!(stopping);

    loop {
        tokio::select! {
            _ = &mut stopping => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%kind, %addr, %peer, "Accepted connection");
                    connections.spawn(serve_connection(stream, peer, tls.clone(), router.clone(), shutdown.clone()));
                }
                Err(source) => {
                    warn!(%kind, %addr, error = %source, "Accept failed");
                    let _ = errors.send(SeederError::Accept { addr, source });
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    info!(%kind, %addr, open = connections.len(), "Listener draining");
    while connections.join_next().await.is_some() {}
    info!(%kind, %addr, "Listener stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    router: Router,
    shutdown: watch::Receiver<bool>,
) {
    let Some(acceptor) = tls else {
        return serve_http(stream, peer, router, shutdown).await;
    };

    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => serve_http(stream, peer, router, shutdown).await,
        Ok(Err(e)) => debug!(%peer, error = %e, "TLS handshake failed"),
        Err(_) => debug!(%peer, "TLS handshake timed out"),
    }
}

async fn serve_http<S>(stream: S, peer: SocketAddr, router: Router, shutdown: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| router.clone().oneshot(request));

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = stopped(shutdown) => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };
    if let Err(e) = result {
        debug!(%peer, error = %e, "Connection closed with error");
    }
}

/// Resolves once `shutdown` turns true or its sender is gone
///
/// The borrow guard from `wait_for` is not `Send`, so it must not live
/// across an await in a spawned task.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
