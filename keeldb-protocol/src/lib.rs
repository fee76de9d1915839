//! # keeldb-protocol
//!
//! Wire protocol for the keeldb connection substrate.
//!
//! This crate provides:
//! - The fixed-layout frame header shared by every packet
//! - Packet types and the 0..=5 payload buffer envelope
//! - Connect status codes, connect types, and HA node states
//! - The magic token / protocol version compatibility gate

pub mod error;
pub mod frame;
pub mod status;
pub mod version;

pub use error::ProtocolError;
pub use frame::{FrameHeader, Packet, PacketType, SessionFlags, HEADER_SIZE, MAX_PACKET_BUFFERS};
pub use status::{ConnectStatus, ConnectType, HaState};
pub use version::{ProtocolVersion, MAGIC};

/// Default TCP port for the keeldb master process.
pub const DEFAULT_MASTER_PORT: u16 = 7683;

/// Maximum size of a single payload buffer (16 MiB).
pub const MAX_BUFFER_SIZE: u32 = 16 * 1024 * 1024;
