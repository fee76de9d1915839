//! Connection entry lifecycle.

use crate::config::LinkConfig;
use crate::stream::LinkStream;
use keeldb_protocol::{ProtocolVersion, SessionFlags};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Lifecycle state of a connection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Usable for I/O.
    Open,
    /// Close requested; in-flight work may still drain.
    Closing,
    /// Socket shut down; never reused for I/O.
    Closed,
}

/// Which side of the protocol this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Client,
    Server,
}

/// Peer address used by the liveness checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAddr {
    /// Remote TCP peer.
    Tcp(SocketAddr),
    /// Same-host Unix-domain peer.
    Unix,
    /// Peer address unavailable (e.g. in-memory test streams).
    Unknown,
}

/// Server-side bookkeeping fields other code paths may touch concurrently.
///
/// Packet I/O on the connection is still single-owner; only these fields
/// are shared, behind the entry's own mutex.
#[derive(Debug, Default)]
pub struct Bookkeeping {
    /// Index into the owner's poll set, when the server tracks one.
    pub poll_index: Option<usize>,
    /// Set when the owner wants this connection's worker to stop.
    pub stop_requested: bool,
}

/// One live or closed transport connection.
///
/// Generic over the byte stream so tests can drive the codec over
/// in-memory pipes; production entries use [`LinkStream`].
pub struct ConnectionEntry<S = LinkStream> {
    pub(crate) stream: S,
    pub(crate) status: ConnStatus,
    pub(crate) config: Arc<LinkConfig>,
    pub(crate) peer: PeerAddr,
    pub(crate) kind: EndpointKind,
    pub(crate) flags: SessionFlags,
    client_id: u32,
    next_request_id: u16,
    tran_index: i32,
    peer_version: Option<ProtocolVersion>,
    raw_fd: Option<RawFd>,
    book: Mutex<Bookkeeping>,
    #[cfg(test)]
    pub(crate) probe_override: Option<bool>,
}

impl<S> std::fmt::Debug for ConnectionEntry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("client_id", &self.client_id)
            .field("status", &self.status)
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("tran_index", &self.tran_index)
            .field("peer_version", &self.peer_version)
            .finish()
    }
}

impl ConnectionEntry<LinkStream> {
    /// Wraps an accepted or connected transport stream in a fresh entry:
    /// status OPEN, a new client id, zeroed transaction/session state.
    pub fn open(stream: LinkStream, kind: EndpointKind, config: Arc<LinkConfig>) -> Self {
        let peer = stream.peer();
        let raw_fd = Some(stream.raw_fd());
        let entry = Self::from_stream_parts(stream, peer, kind, config, raw_fd);
        tracing::debug!(
            "opened connection entry {} to {:?} ({:?})",
            entry.client_id,
            entry.peer,
            entry.kind
        );
        entry
    }
}

impl<S> ConnectionEntry<S> {
    /// Builds an entry around an arbitrary byte stream.
    pub fn from_stream(stream: S, peer: PeerAddr, kind: EndpointKind, config: Arc<LinkConfig>) -> Self {
        Self::from_stream_parts(stream, peer, kind, config, None)
    }

    fn from_stream_parts(
        stream: S,
        peer: PeerAddr,
        kind: EndpointKind,
        config: Arc<LinkConfig>,
        raw_fd: Option<RawFd>,
    ) -> Self {
        Self {
            stream,
            status: ConnStatus::Open,
            config,
            peer,
            kind,
            flags: SessionFlags::default(),
            client_id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            next_request_id: 0,
            tran_index: -1,
            peer_version: None,
            raw_fd,
            book: Mutex::new(Bookkeeping::default()),
            #[cfg(test)]
            probe_override: None,
        }
    }

    /// Returns the entry's lifecycle status.
    pub fn status(&self) -> ConnStatus {
        self.status
    }

    /// Returns the process-unique client id assigned at open.
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Returns which side of the protocol this endpoint is.
    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Returns the peer address.
    pub fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// Returns the underlying socket descriptor, when backed by a real socket.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.raw_fd
    }

    /// Returns the next request id, wrapping and skipping 0.
    pub fn next_request_id(&mut self) -> u16 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        if self.next_request_id == 0 {
            self.next_request_id = 1;
        }
        self.next_request_id
    }

    /// Returns the transaction index bound to this connection.
    pub fn tran_index(&self) -> i32 {
        self.tran_index
    }

    /// Binds a transaction index to this connection.
    pub fn set_tran_index(&mut self, tran_index: i32) {
        self.tran_index = tran_index;
    }

    /// Returns the piggy-backed HA session flags from the last receive.
    pub fn session_flags(&self) -> SessionFlags {
        self.flags
    }

    /// Returns the peer's protocol version, once negotiated.
    pub fn peer_version(&self) -> Option<ProtocolVersion> {
        self.peer_version
    }

    pub(crate) fn set_peer_version(&mut self, version: ProtocolVersion) {
        self.peer_version = version.into();
    }

    /// Returns the server-side bookkeeping mutex.
    pub fn bookkeeping(&self) -> &Mutex<Bookkeeping> {
        &self.book
    }

    /// Requests a graceful close; I/O already in flight may drain.
    pub fn mark_closing(&mut self) {
        if self.status == ConnStatus::Open {
            self.status = ConnStatus::Closing;
        }
    }
}

impl<S> ConnectionEntry<S>
where
    S: AsyncWrite + Unpin,
{
    /// Closes the connection. Idempotent: the socket is shut down at most
    /// once, and a closed entry is never reused for I/O.
    pub async fn close(&mut self) {
        if self.status != ConnStatus::Closed {
            let _ = self.stream.shutdown().await;
            self.status = ConnStatus::Closed;
            tracing::debug!("closed connection entry {}", self.client_id);
        }
    }
}
