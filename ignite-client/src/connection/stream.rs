//! Byte transport under a node connection: plain TCP or TLS over TCP.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    /// The socket a [`Connection`](super::Connection) frames over.
    #[project = TransportProj]
    pub enum Transport {
        /// Unencrypted TCP.
        Tcp { #[pin] socket: TcpStream },
        /// TLS session wrapping TCP.
        Tls { #[pin] socket: Box<TlsStream<TcpStream>> },
    }
}

impl Transport {
    /// Wraps a plain socket.
    pub fn tcp(socket: TcpStream) -> Self {
        Self::Tcp { socket }
    }

    /// Wraps an established TLS session.
    pub fn tls(socket: TlsStream<TcpStream>) -> Self {
        Self::Tls {
            socket: Box::new(socket),
        }
    }

    /// Returns true if traffic is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// Returns the remote address of the underlying socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Tcp { socket } => socket.peer_addr(),
            Self::Tls { socket } => socket.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Tcp { socket } => socket.poll_read(cx, buf),
            TransportProj::Tls { socket } => socket.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            TransportProj::Tcp { socket } => socket.poll_write(cx, buf),
            TransportProj::Tls { socket } => socket.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Tcp { socket } => socket.poll_flush(cx),
            TransportProj::Tls { socket } => socket.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Tcp { socket } => socket.poll_shutdown(cx),
            TransportProj::Tls { socket } => socket.poll_shutdown(cx),
        }
    }
}
