//! # Connection
//!
//! Wraps one socket plus an outbound byte buffer, with the read/write/
//! queue/flush primitives the rest of the proxy is built on: a thin object
//! around a socket that never panics on a closed connection and tracks
//! queued-but-unsent bytes separately from the live write path.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::error::SessionError;

/// The concrete I/O type used for a session's client-facing socket: either
/// a plain TCP stream (`--http` mode) or a server-side TLS stream
/// (`--https` mode). The backend leg is always plain TCP and uses
/// `TcpStream` directly rather than this enum.
pub enum ClientIo {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ClientIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientIo::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClientIo::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientIo::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClientIo::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientIo::Plain(s) => Pin::new(s).poll_flush(cx),
            ClientIo::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientIo::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClientIo::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Default chunk size for `Connection::read`.
pub const READ_CHUNK_SIZE: usize = 4096;

/// One socket plus the bytes queued for it but not yet written.
///
/// Invariant: `out_buffer` is non-empty iff this connection currently needs
/// write-readiness. Invariant: once `closed` is true, every operation on
/// this connection is a no-op or a predictable error — it never panics the
/// owning session.
pub struct Connection<S> {
    stream: Option<S>,
    peer: SocketAddr,
    out_buffer: BytesMut,
    closed: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Connection {
            stream: Some(stream),
            peer,
            out_buffer: BytesMut::new(),
            closed: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending_bytes(&self) -> usize {
        self.out_buffer.len()
    }

    /// Reads the next chunk (1..=`max_bytes`). Returns `Ok(None)` on an
    /// orderly peer close (zero-length read) and otherwise the bytes read.
    /// A read on an already-closed connection returns `Ok(None)` rather
    /// than erroring, matching the "predictable, never panics" invariant.
    pub async fn read(&mut self, max_bytes: usize) -> Result<Option<Bytes>, SessionError>
    where
        S: ReadErrorKind,
    {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; max_bytes];
        let n = stream.read(&mut buf).await.map_err(S::read_error)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    /// Writes as many bytes as the kernel accepts right now and returns the
    /// count. Rejects an empty buffer as a programming error.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, SessionError>
    where
        S: WriteErrorKind,
    {
        if data.is_empty() {
            return Err(SessionError::EmptyBuffer("Connection::write"));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };
        stream.write(data).await.map_err(S::write_error)
    }

    /// Appends to `out_buffer`. Rejects an empty buffer as a programming
    /// error, matching `write`.
    pub fn queue(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        if data.is_empty() {
            return Err(SessionError::EmptyBuffer("Connection::queue"));
        }
        self.out_buffer.extend_from_slice(data);
        Ok(data.len())
    }

    /// Writes from `out_buffer` and removes the written prefix, returning
    /// the number of bytes flushed.
    pub async fn flush(&mut self) -> Result<usize, SessionError>
    where
        S: WriteErrorKind,
    {
        if self.out_buffer.is_empty() || self.stream.is_none() {
            return Ok(0);
        }
        let stream = self.stream.as_mut().unwrap();
        let n = stream.write(&self.out_buffer).await.map_err(S::write_error)?;
        let _ = self.out_buffer.split_to(n);
        Ok(n)
    }

    /// Releases the socket and marks this connection closed. Idempotent:
    /// calling `close` on an already-closed connection is a no-op. Dropping
    /// the stream is enough to close the underlying socket; there is
    /// nothing to flush on a connection we are abandoning.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stream.take();
        self.closed = true;
    }
}

/// Maps a read-side `io::Error` to the `SessionError` variant appropriate
/// for this connection's role (client vs. backend). Implemented separately
/// for `ClientIo` and `TcpStream` so `Connection<ClientIo>` and
/// `Connection<TcpStream>` report distinguishable error kinds without the
/// caller having to track which side it is holding.
pub trait ReadErrorKind {
    fn read_error(e: io::Error) -> SessionError;
}

pub trait WriteErrorKind {
    fn write_error(e: io::Error) -> SessionError;
}

impl ReadErrorKind for ClientIo {
    fn read_error(e: io::Error) -> SessionError {
        SessionError::ClientRead(e)
    }
}

impl WriteErrorKind for ClientIo {
    fn write_error(e: io::Error) -> SessionError {
        SessionError::ClientWrite(e)
    }
}

impl ReadErrorKind for TcpStream {
    fn read_error(e: io::Error) -> SessionError {
        SessionError::ServerRead(e)
    }
}

impl WriteErrorKind for TcpStream {
    fn write_error(e: io::Error) -> SessionError {
        SessionError::ServerWrite(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (connect, accept) = tokio::join!(connect, accept);
        (connect.unwrap(), accept.unwrap().0)
    }

    #[tokio::test]
    async fn queue_then_flush_writes_bytes() {
        let (a, mut b) = loopback_pair().await;
        let peer = a.peer_addr().unwrap();
        let mut conn = Connection::new(a, peer);

        conn.queue(b"hello").unwrap();
        assert_eq!(conn.pending_bytes(), 5);
        let n = conn.flush().await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(conn.pending_bytes(), 0);

        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn read_returns_none_on_peer_close() {
        let (a, b) = loopback_pair().await;
        let peer = a.peer_addr().unwrap();
        drop(b);
        let mut conn = Connection::new(a, peer);
        let result = conn.read(READ_CHUNK_SIZE).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (a, _b) = loopback_pair().await;
        let peer = a.peer_addr().unwrap();
        let mut conn = Connection::new(a, peer);
        conn.close();
        conn.close();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn empty_queue_is_rejected() {
        let (a, _b) = loopback_pair().await;
        let peer = a.peer_addr().unwrap();
        let mut conn = Connection::new(a, peer);
        assert!(conn.queue(b"").is_err());
    }
}
