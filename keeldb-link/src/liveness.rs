//! Peer-liveness probing.
//!
//! Answers "is the peer's host still up?" while a blocking receive has been
//! waiting unusually long, without waiting out the full protocol timeout.
//! The check is advisory: a dead verdict shortens the wait with
//! [`LinkError::PeerDead`](crate::LinkError::PeerDead), an alive verdict
//! never extends it past the caller's bound.

use crate::entry::{EndpointKind, PeerAddr};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Echo-style port probed to decide whether a TCP peer's host is up.
pub const ECHO_PORT: u16 = 7;

/// Which endpoint kinds run the peer-alive probe during long waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliveCheckMode {
    /// Never probe.
    #[default]
    None,
    /// Only server endpoints probe their client peers.
    ServerOnly,
    /// Only client endpoints probe their server peers.
    ClientOnly,
    /// Both sides probe.
    Both,
}

impl AliveCheckMode {
    /// Returns whether an endpoint of `kind` should probe its peer.
    pub fn enabled_for(&self, kind: EndpointKind) -> bool {
        match self {
            AliveCheckMode::None => false,
            AliveCheckMode::ServerOnly => kind == EndpointKind::Server,
            AliveCheckMode::ClientOnly => kind == EndpointKind::Client,
            AliveCheckMode::Both => true,
        }
    }
}

/// Best-effort probe of the peer's host.
///
/// A Unix-domain peer shares our host and is always alive. For a TCP peer a
/// short connect is attempted against the echo port: a refused or accepted
/// connection both prove the host is up; unreachable or timed out means it
/// is not.
pub async fn peer_alive(peer: &PeerAddr, probe_timeout: std::time::Duration) -> bool {
    match peer {
        PeerAddr::Unix | PeerAddr::Unknown => true,
        PeerAddr::Tcp(addr) => {
            let target = SocketAddr::new(addr.ip(), ECHO_PORT);
            match tokio::time::timeout(probe_timeout, TcpStream::connect(target)).await {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    // Refused still means a host answered the SYN.
                    let alive = e.kind() == io::ErrorKind::ConnectionRefused;
                    if !alive {
                        tracing::debug!("peer probe to {} failed: {}", target, e);
                    }
                    alive
                }
                Err(_) => {
                    tracing::debug!("peer probe to {} timed out", target);
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mode_enabled_for() {
        assert!(!AliveCheckMode::None.enabled_for(EndpointKind::Client));
        assert!(!AliveCheckMode::None.enabled_for(EndpointKind::Server));

        assert!(AliveCheckMode::ServerOnly.enabled_for(EndpointKind::Server));
        assert!(!AliveCheckMode::ServerOnly.enabled_for(EndpointKind::Client));

        assert!(AliveCheckMode::ClientOnly.enabled_for(EndpointKind::Client));
        assert!(!AliveCheckMode::ClientOnly.enabled_for(EndpointKind::Server));

        assert!(AliveCheckMode::Both.enabled_for(EndpointKind::Client));
        assert!(AliveCheckMode::Both.enabled_for(EndpointKind::Server));
    }

    #[tokio::test]
    async fn test_unix_peer_always_alive() {
        assert!(peer_alive(&PeerAddr::Unix, Duration::from_millis(10)).await);
        assert!(peer_alive(&PeerAddr::Unknown, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_refused_means_alive() {
        // Nothing listens on the echo port of loopback in the test
        // environment; a refused connect still proves the host is up.
        let peer = PeerAddr::Tcp("127.0.0.1:9999".parse().unwrap());
        assert!(peer_alive(&peer, Duration::from_secs(1)).await);
    }
}
