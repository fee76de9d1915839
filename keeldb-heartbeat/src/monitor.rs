//! Heartbeat monitor.
//!
//! Registers a worker process with the master and watches the registration
//! channel for the master's disappearance. A worker that loses its
//! supervisor must not keep running unsupervised: once the master is gone
//! the monitor closes its connection, waits a short grace period, and
//! invokes the termination seam.

use crate::error::HeartbeatError;
use crate::registration::ProcessRegistration;
use keeldb_link::{
    connect_hb_proc, ConnectFailReason, ConnectionEntry, LinkConfig, LinkError, LinkStream, Timeout,
};
use keeldb_protocol::{ConnectStatus, PacketType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Grace period between losing the master and terminating.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Seam through which the monitor terminates its own process.
pub trait Terminate: Send + Sync {
    fn terminate(&self);
}

/// Default policy: exit the process.
pub struct ProcessExit {
    pub code: i32,
}

impl Terminate for ProcessExit {
    fn terminate(&self) {
        std::process::exit(self.code);
    }
}

/// Registers this process with the master over a dedicated heartbeat
/// channel and returns the supervision connection.
pub async fn register_to_master(
    config: &Arc<LinkConfig>,
    host: &str,
    registration: &ProcessRegistration,
) -> Result<ConnectionEntry<LinkStream>, HeartbeatError> {
    let payload = registration.to_payload()?;
    match connect_hb_proc(config, host, &payload).await {
        Ok(entry) => {
            tracing::info!(
                "process '{}' (pid {}) registered with master {}",
                registration.name,
                registration.pid,
                host
            );
            Ok(entry)
        }
        Err(LinkError::ConnectFailed {
            reason:
                ConnectFailReason::Status {
                    status: ConnectStatus::AlreadyExists,
                    ..
                },
            ..
        }) => Err(HeartbeatError::AlreadyRegistered {
            name: registration.name.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Supervisory loop watching the master connection.
///
/// Started once per process lifetime and never restarted.
pub struct HeartbeatMonitor {
    config: Arc<LinkConfig>,
    terminator: Arc<dyn Terminate>,
    started: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(config: Arc<LinkConfig>, terminator: Arc<dyn Terminate>) -> Self {
        Self {
            config,
            terminator,
            started: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns whether the monitor has decided the process must shut down.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Spawns the supervisory loop over an established registration
    /// connection. Idempotent: a second call does nothing and returns None.
    pub fn start(
        self: &Arc<Self>,
        entry: ConnectionEntry<LinkStream>,
    ) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("heartbeat monitor already started");
            return None;
        }
        let monitor = self.clone();
        Some(tokio::spawn(async move {
            monitor.supervise(entry).await;
        }))
    }

    async fn supervise(&self, mut entry: ConnectionEntry<LinkStream>) {
        let poll = Timeout::Bounded(self.config.connect_timeout());
        loop {
            match entry.receive(poll).await {
                Ok(packet) => match packet.header.packet_type {
                    // The master's pings are plain COMMAND packets; the
                    // payload carries nothing we act on.
                    PacketType::Command => {
                        tracing::trace!("heartbeat ping from master");
                    }
                    other => {
                        tracing::debug!("ignoring {:?} packet on heartbeat channel", other);
                    }
                },
                // No traffic inside the poll interval; the master is idle
                // but the channel is intact. Keep watching.
                Err(LinkError::Timeout) => continue,
                Err(e) => {
                    tracing::warn!("lost master connection: {}", e);
                    break;
                }
            }
        }

        self.shutdown.store(true, Ordering::SeqCst);
        entry.close().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::error!("master supervision lost; terminating process");
        self.terminator.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeldb_link::EndpointKind;

    struct RecordingTerminator {
        fired: AtomicBool,
    }

    impl Terminate for RecordingTerminator {
        fn terminate(&self) {
            self.fired.store(true, Ordering::SeqCst);
        }
    }

    async fn connected_entry(config: &Arc<LinkConfig>) -> (ConnectionEntry<LinkStream>, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let master = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Keep the master half open while the monitor runs.
            tokio::time::sleep(Duration::from_millis(500)).await;
        });
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let entry = ConnectionEntry::open(
            LinkStream::Tcp { stream },
            EndpointKind::Client,
            config.clone(),
        );
        (entry, master)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let config = Arc::new(LinkConfig::default());
        let terminator = Arc::new(RecordingTerminator {
            fired: AtomicBool::new(false),
        });
        let monitor = Arc::new(HeartbeatMonitor::new(config.clone(), terminator));

        let (first, _master_a) = connected_entry(&config).await;
        let (second, _master_b) = connected_entry(&config).await;

        let handle = monitor.start(first);
        assert!(handle.is_some());
        assert!(monitor.start(second).is_none());

        handle.unwrap().abort();
    }

    #[tokio::test]
    async fn test_lost_master_triggers_termination() {
        let config = Arc::new(LinkConfig {
            connect_timeout_ms: 200,
            ..Default::default()
        });
        let terminator = Arc::new(RecordingTerminator {
            fired: AtomicBool::new(false),
        });
        let monitor = Arc::new(HeartbeatMonitor::new(config.clone(), terminator.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let master = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Master dies shortly after the worker registers.
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(stream);
        });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let entry = ConnectionEntry::open(
            LinkStream::Tcp { stream },
            EndpointKind::Client,
            config,
        );

        let handle = monitor.start(entry).unwrap();
        master.await.unwrap();
        handle.await.unwrap();

        assert!(monitor.shutdown_requested());
        assert!(terminator.fired.load(Ordering::SeqCst));
    }
}
