//! Link error types.

use keeldb_protocol::{ConnectStatus, PacketType, ProtocolError, ProtocolVersion};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by the connection substrate.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("receive timed out")]
    Timeout,

    #[error("peer host is not responding")]
    PeerDead,

    #[error("unexpected packet type: expected {expected:?}, got {got:?}")]
    WrongPacketType {
        expected: PacketType,
        got: PacketType,
    },

    #[error("no connection registered for host '{0}'")]
    HostNotFound(String),

    #[error("peer aborted the request")]
    PeerAborted,

    #[error("protocol version not compatible: local {local}, peer {peer}")]
    NotCompatibleVersion {
        local: ProtocolVersion,
        peer: ProtocolVersion,
    },

    #[error("cannot connect to {endpoint}: {reason}")]
    CannotConnect { endpoint: String, reason: String },

    #[error("connect to '{target}' failed: {reason}")]
    ConnectFailed {
        target: String,
        reason: ConnectFailReason,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Why a master-brokered connect attempt failed.
#[derive(Debug)]
pub enum ConnectFailReason {
    /// The master answered with a failing status code, possibly followed by
    /// a human-readable detail blob.
    Status {
        status: ConnectStatus,
        detail: Option<String>,
    },
    /// An I/O error occurred mid-handshake; the connection was torn down.
    Io(String),
    /// The target server was still booting after every retry attempt.
    RetriesExhausted(u32),
}

impl fmt::Display for ConnectFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailReason::Status {
                status,
                detail: Some(detail),
            } => write!(f, "{status} ({detail})"),
            ConnectFailReason::Status { status, .. } => write!(f, "{status}"),
            ConnectFailReason::Io(reason) => write!(f, "I/O error: {reason}"),
            ConnectFailReason::RetriesExhausted(attempts) => {
                write!(f, "server still starting after {attempts} attempts")
            }
        }
    }
}

impl LinkError {
    /// Returns whether a fresh `connect` could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::ConnectionClosed
            | LinkError::WriteFailed(_)
            | LinkError::ReadFailed(_)
            | LinkError::Timeout
            | LinkError::CannotConnect { .. } => true,
            LinkError::ConnectFailed { reason, .. } => matches!(
                reason,
                ConnectFailReason::Status {
                    status: ConnectStatus::Started,
                    ..
                } | ConnectFailReason::RetriesExhausted(_)
                    | ConnectFailReason::Io(_)
            ),
            _ => false,
        }
    }
}
