//! # keeldb-comm
//!
//! Connection substrate for keeldb: binary framing, the master-brokered
//! connect handshake, the per-process connection registry, and heartbeat
//! supervision of worker processes.
//!
//! This umbrella crate re-exports the member crates:
//! - [`protocol`] - wire format: frame header, status codes, version gate
//! - [`link`] - connection entries, codec, registry, handshake, liveness
//! - [`heartbeat`] - process registration and the supervision monitor

pub use keeldb_heartbeat as heartbeat;
pub use keeldb_link as link;
pub use keeldb_protocol as protocol;

pub use keeldb_heartbeat::{HeartbeatMonitor, ProcessRegistration};
pub use keeldb_link::{
    ConnectionEntry, ConnectionRegistry, LinkConfig, LinkError, LinkStream, Timeout,
};
pub use keeldb_protocol::{ConnectStatus, FrameHeader, Packet, PacketType, ProtocolVersion};
