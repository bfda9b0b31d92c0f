//! # Listener
//!
//! Binds the proxy's single listening socket, accepts connections in a loop,
//! and spawns one `ProxySession` task per accept. Grounded on the same
//! bind-log-loop-spawn-check-shutdown shape as a raw Tokio accept loop: bind,
//! log, loop on `listener.accept()`, spawn a task per connection, check a
//! shutdown flag between accepts.
//!
//! ## Server Lifecycle
//!
//! 1. Bind a `socket2` socket so the backlog and `SO_REUSEADDR` can be set
//!    explicitly, then hand it to Tokio.
//! 2. Loop on `accept()`, spawning a session task per connection.
//! 3. In HTTPS mode, wrap the accepted socket in TLS on the spawned task
//!    rather than the accept loop, so a slow handshake never blocks new
//!    accepts.
//! 4. Stop accepting once the shutdown flag (set by the SIGINT handler in
//!    `main`) is observed; in-flight sessions are left to finish on their
//!    own.
//!
//! ## Logging
//!
//! * Info level: bind success, shutdown.
//! * Warn level: TLS handshake failures (isolated to the failing session).
//! * Error level: accept-loop I/O errors.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::config::BackendTable;
use crate::connection::ClientIo;
use crate::counter::ConnectionCounter;
use crate::error::SessionError;
use crate::session;

/// Binds `(host, port)` with the given backlog and `SO_REUSEADDR`, returning
/// a Tokio listener ready to accept.
fn bind(host: &str, port: u16, backlog: u32) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)
        .context("failed to create listening socket")?;
    socket
        .set_reuse_address(true)
        .context("failed to set SO_REUSEADDR")?;
    socket
        .set_nonblocking(true)
        .context("failed to set listening socket non-blocking")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;
    socket
        .listen(backlog as i32)
        .with_context(|| format!("failed to listen on {addr} with backlog {backlog}"))?;

    TcpListener::from_std(socket.into()).context("failed to hand socket to the async runtime")
}

/// Runs the accept loop for plaintext (`--http`) mode until `shutdown` is
/// set. Each accepted connection is handled by its own `ProxySession` task.
pub async fn serve_plain(
    host: &str,
    port: u16,
    backlog: u32,
    backends: Arc<BackendTable>,
    counter: Arc<ConnectionCounter>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let listener = bind(host, port, backlog)?;
    log::info!("listening on {host}:{port} (plain)");

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let backends = Arc::clone(&backends);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    session::run_session(ClientIo::Plain(stream), peer, backends, counter).await;
                });
            }
            Err(e) => {
                log::error!("accept failed: {e}");
            }
        }
    }

    log::info!("listener shutting down");
    Ok(())
}

/// Runs the accept loop for TLS (`--https`) mode until `shutdown` is set.
/// The TLS handshake happens on the spawned session task, not here, so a
/// stalled client never stalls the accept loop.
pub async fn serve_tls(
    host: &str,
    port: u16,
    backlog: u32,
    acceptor: TlsAcceptor,
    backends: Arc<BackendTable>,
    counter: Arc<ConnectionCounter>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let listener = bind(host, port, backlog)?;
    log::info!("listening on {host}:{port} (tls)");

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let acceptor = acceptor.clone();
                let backends = Arc::clone(&backends);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            session::run_session(
                                ClientIo::Tls(Box::new(tls_stream)),
                                peer,
                                backends,
                                counter,
                            )
                            .await;
                        }
                        Err(e) => {
                            let err = SessionError::TlsHandshake(e);
                            log::warn!("{peer}: {err}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("accept failed: {e}");
            }
        }
    }

    log::info!("listener shutting down");
    Ok(())
}
