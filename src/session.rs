//! # Proxy Session
//!
//! Per-connection state machine: classify the client's first chunk, dial the
//! matching backend (or the CONNECT-primed target), then shuttle bytes in
//! both directions until either side closes.
//!
//! ## State Machine
//!
//! `AwaitFirstChunk` -> `Classified` or `ConnectPrimed` -> `Relay` ->
//! `Closing` -> `Terminated`. `FirstChunkVerdict` below is the tagged union
//! that decides the first transition.
//!
//! ## Logging
//!
//! * Info level: session start, classification result, backend dial.
//! * Warn level: malformed head, TLS handshake failure.
//! * Debug level: byte counts flushed per direction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::classifier::{self, ProtocolKind};
use crate::config::BackendTable;
use crate::connection::{ClientIo, Connection, READ_CHUNK_SIZE};
use crate::counter::ConnectionCounter;
use crate::error::SessionError;
use crate::http_head;

/// Backend connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness loop timeout.
const READINESS_TIMEOUT: Duration = Duration::from_secs(1);

/// Default soft cap on an outbound buffer before the opposite side's reads
/// pause.
const DEFAULT_BACKPRESSURE_CAP: usize = 1024 * 1024;

/// The decision made from a session's first chunk of client bytes.
enum FirstChunkVerdict {
    /// The chunk classified cleanly to a known backend protocol.
    Classified(ProtocolKind),
    /// The chunk was an HTTP `CONNECT host:port` priming request.
    HttpConnect { host: String, port: u16 },
    /// Neither: close the session.
    Reject,
}

fn first_chunk_verdict(data: &[u8]) -> Result<FirstChunkVerdict, SessionError> {
    let kind = classifier::classify(data);
    if kind != ProtocolKind::Unknown {
        return Ok(FirstChunkVerdict::Classified(kind));
    }
    let head = http_head::parse(data).map_err(SessionError::MalformedHead)?;
    Ok(match head.connect_authority() {
        Some((host, port)) => FirstChunkVerdict::HttpConnect { host, port },
        None => FirstChunkVerdict::Reject,
    })
}

/// Increments the live-session counter on creation and guarantees exactly
/// one matching decrement, including when the session task unwinds from a
/// panic rather than returning normally.
struct SessionGuard {
    counter: Arc<ConnectionCounter>,
}

impl SessionGuard {
    fn new(counter: Arc<ConnectionCounter>) -> Self {
        counter.increment();
        SessionGuard { counter }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

/// Runs one accepted connection to completion. The live-session counter is
/// decremented exactly once no matter how the session ends, including an
/// unwind from a panic, via `SessionGuard`'s `Drop` impl.
pub async fn run_session(
    client_io: ClientIo,
    peer: SocketAddr,
    backends: Arc<BackendTable>,
    counter: Arc<ConnectionCounter>,
) {
    let _guard = SessionGuard::new(counter);
    log::info!("session started for {peer}");

    let mut client = Connection::new(client_io, peer);
    let outcome = drive_session(&mut client, &backends).await;

    if let Err(err) = outcome {
        log::warn!("session for {peer} ended with error: {err}");
    }
    client.close();
    log::info!("session ended for {peer}");
}

async fn drive_session(
    client: &mut Connection<ClientIo>,
    backends: &Arc<BackendTable>,
) -> Result<(), SessionError> {
    let first_chunk = match client.read(READ_CHUNK_SIZE).await? {
        Some(bytes) => bytes,
        None => return Ok(()),
    };

    let mut server = match first_chunk_verdict(&first_chunk)? {
        FirstChunkVerdict::Classified(kind) => {
            log::info!("classified session as {kind}");
            let (host, port) = backends
                .lookup(kind)
                .expect("BackendTable has an entry for every non-Unknown ProtocolKind");
            let mut server = dial_backend(host, port).await?;
            server.queue(&first_chunk)?;
            server
        }
        FirstChunkVerdict::HttpConnect { host, port } => {
            log::info!("HTTP CONNECT priming to {host}:{port}");
            let server = dial_backend(&host, port).await?;
            client.queue(b"HTTP/1.1 101 Connection Established\r\n\r\n")?;
            server
        }
        FirstChunkVerdict::Reject => {
            log::warn!("unrecognised first chunk from {}, closing", client.peer());
            return Ok(());
        }
    };

    if client.pending_bytes() > 0 {
        client.flush().await?;
    }
    relay(client, &mut server).await
}

async fn dial_backend(host: &str, port: u16) -> Result<Connection<TcpStream>, SessionError> {
    let addr = format!("{host}:{port}");
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| SessionError::BackendConnect {
            host: host.to_string(),
            port,
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| SessionError::BackendConnect {
            host: host.to_string(),
            port,
            source,
        })?;
    let peer = stream
        .peer_addr()
        .unwrap_or_else(|_| ([0, 0, 0, 0], 0).into());
    Ok(Connection::new(stream, peer))
}

/// Relays bytes between `client` and `server` until both sides are closed.
/// Each iteration computes read/write readiness, waits up to one second,
/// and flushes writers before attempting reads.
async fn relay(
    client: &mut Connection<ClientIo>,
    server: &mut Connection<TcpStream>,
) -> Result<(), SessionError> {
    loop {
        if client.is_closed() && server.is_closed() {
            return Ok(());
        }

        if client.pending_bytes() > 0 {
            client.flush().await?;
        }
        if server.pending_bytes() > 0 {
            server.flush().await?;
        }

        let client_readable = !client.is_closed() && server.pending_bytes() < DEFAULT_BACKPRESSURE_CAP;
        let server_readable = !server.is_closed() && client.pending_bytes() < DEFAULT_BACKPRESSURE_CAP;

        tokio::select! {
            result = client.read(READ_CHUNK_SIZE), if client_readable => {
                match result? {
                    Some(data) => {
                        if server.is_closed() {
                            client.close();
                        } else {
                            server.queue(&data)?;
                        }
                    }
                    None => close_one_side(client, server),
                }
            }
            result = server.read(READ_CHUNK_SIZE), if server_readable => {
                match result? {
                    Some(data) => {
                        if client.is_closed() {
                            server.close();
                        } else {
                            client.queue(&data)?;
                        }
                    }
                    None => close_one_side(server, client),
                }
            }
            _ = tokio::time::sleep(READINESS_TIMEOUT) => {}
        }
    }
}

/// Called when `closing_side`'s read returned `None` (orderly peer close).
/// Marks it closed; if the opposite side has nothing left queued, closes it
/// too rather than leaving it to flush into a connection nobody is reading.
fn close_one_side<A, B>(closing_side: &mut Connection<A>, opposite: &mut Connection<B>)
where
    A: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    B: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    closing_side.close();
    if opposite.pending_bytes() == 0 {
        opposite.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_chunk_yields_classified_verdict() {
        let verdict = first_chunk_verdict(b"SSH-2.0-x").unwrap();
        assert!(matches!(verdict, FirstChunkVerdict::Classified(ProtocolKind::Ssh)));
    }

    #[test]
    fn connect_chunk_yields_http_connect_verdict() {
        let raw = b"CONNECT example.com:22 HTTP/1.1\r\nHost: example.com:22\r\n\r\n";
        let verdict = first_chunk_verdict(raw).unwrap();
        match verdict {
            FirstChunkVerdict::HttpConnect { host, port } => {
                assert_eq!(host, "example.com");
                assert_eq!(port, 22);
            }
            _ => panic!("expected HttpConnect"),
        }
    }

    #[test]
    fn well_formed_non_connect_request_is_rejected() {
        let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let verdict = first_chunk_verdict(raw).unwrap();
        assert!(matches!(verdict, FirstChunkVerdict::Reject));
    }

    #[test]
    fn garbage_input_yields_malformed_head_error() {
        let err = first_chunk_verdict(b"garbage input").unwrap_err();
        assert!(matches!(err, SessionError::MalformedHead(_)));
    }
}
