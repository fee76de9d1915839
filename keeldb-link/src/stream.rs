//! Transport stream abstraction over TCP and Unix-domain sockets.
//!
//! The codec is transport-agnostic once given a byte-stream handle; this
//! enum is that handle for the two transports the substrate speaks.

use crate::config::LinkConfig;
use crate::entry::PeerAddr;
use crate::error::LinkError;
use pin_project_lite::pin_project;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream, UnixStream};

pin_project! {
    /// A byte stream that is either TCP or Unix-domain.
    #[project = LinkStreamProj]
    pub enum LinkStream {
        Tcp { #[pin] stream: TcpStream },
        Unix { #[pin] stream: UnixStream },
    }
}

impl LinkStream {
    /// Opens a TCP connection with the configured socket options and
    /// connect timeout.
    pub async fn connect_tcp(addr: SocketAddr, config: &LinkConfig) -> Result<Self, LinkError> {
        let cannot = |reason: String| LinkError::CannotConnect {
            endpoint: addr.to_string(),
            reason,
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| cannot(e.to_string()))?;

        if let Some(size) = config.tcp_send_buffer_size {
            socket.set_send_buffer_size(size).ok();
        }
        if let Some(size) = config.tcp_recv_buffer_size {
            socket.set_recv_buffer_size(size).ok();
        }
        socket.set_keepalive(config.keepalive).ok();

        let stream = tokio::time::timeout(config.connect_timeout(), socket.connect(addr))
            .await
            .map_err(|_| cannot("connect timed out".to_string()))?
            .map_err(|e| cannot(e.to_string()))?;

        stream.set_nodelay(config.no_delay).ok();
        tracing::debug!("connected to {} (tcp)", addr);
        Ok(LinkStream::Tcp { stream })
    }

    /// Resolves `host:port` and opens a TCP connection to the first address.
    pub async fn connect_tcp_host(
        host: &str,
        port: u16,
        config: &LinkConfig,
    ) -> Result<Self, LinkError> {
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| LinkError::CannotConnect {
                endpoint: format!("{host}:{port}"),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| LinkError::CannotConnect {
                endpoint: format!("{host}:{port}"),
                reason: "host did not resolve".to_string(),
            })?;
        Self::connect_tcp(addr, config).await
    }

    /// Opens a Unix-domain connection with the configured connect timeout.
    pub async fn connect_unix(path: &Path, config: &LinkConfig) -> Result<Self, LinkError> {
        let cannot = |reason: String| LinkError::CannotConnect {
            endpoint: path.display().to_string(),
            reason,
        };

        let stream = tokio::time::timeout(config.connect_timeout(), UnixStream::connect(path))
            .await
            .map_err(|_| cannot("connect timed out".to_string()))?
            .map_err(|e| cannot(e.to_string()))?;

        tracing::debug!("connected to {} (unix)", path.display());
        Ok(LinkStream::Unix { stream })
    }

    /// Returns whether this is a Unix-domain stream.
    pub fn is_unix(&self) -> bool {
        matches!(self, LinkStream::Unix { .. })
    }

    /// Returns the peer address for liveness probing.
    pub fn peer(&self) -> PeerAddr {
        match self {
            LinkStream::Tcp { stream } => stream
                .peer_addr()
                .map(PeerAddr::Tcp)
                .unwrap_or(PeerAddr::Unknown),
            LinkStream::Unix { .. } => PeerAddr::Unix,
        }
    }

    /// Returns the underlying socket descriptor.
    pub fn raw_fd(&self) -> RawFd {
        match self {
            LinkStream::Tcp { stream } => stream.as_raw_fd(),
            LinkStream::Unix { stream } => stream.as_raw_fd(),
        }
    }
}

impl AsyncRead for LinkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
            LinkStreamProj::Unix { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LinkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
            LinkStreamProj::Unix { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_write_vectored(cx, bufs),
            LinkStreamProj::Unix { stream } => stream.poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            LinkStream::Tcp { stream } => stream.is_write_vectored(),
            LinkStream::Unix { stream } => stream.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_flush(cx),
            LinkStreamProj::Unix { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
            LinkStreamProj::Unix { stream } => stream.poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect_and_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = LinkConfig::default();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let mut stream = LinkStream::connect_tcp(addr, &config).await.unwrap();
        let (mut peer, _) = accept.await.unwrap();

        assert!(!stream.is_unix());
        assert!(matches!(stream.peer(), PeerAddr::Tcp(a) if a == addr));
        assert!(stream.raw_fd() >= 0);

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = LinkConfig {
            connect_timeout_ms: 500,
            ..Default::default()
        };
        let result = LinkStream::connect_tcp(addr, &config).await;
        assert!(matches!(result, Err(LinkError::CannotConnect { .. })));
    }

    #[tokio::test]
    async fn test_unix_connect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let config = LinkConfig::default();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = LinkStream::connect_unix(&path, &config).await.unwrap();
        accept.await.unwrap();

        assert!(stream.is_unix());
        assert!(matches!(stream.peer(), PeerAddr::Unix));
    }

    #[tokio::test]
    async fn test_unix_connect_missing_socket() {
        let config = LinkConfig::default();
        let result = LinkStream::connect_unix(Path::new("/nonexistent/keeldb.sock"), &config).await;
        assert!(matches!(result, Err(LinkError::CannotConnect { .. })));
    }
}
