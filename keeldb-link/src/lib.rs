//! # keeldb-link
//!
//! Connection substrate for keeldb.
//!
//! This crate provides:
//! - Connection entries over TCP or Unix-domain streams
//! - Vectored packet send and sliced receive with partial-I/O resume
//! - A host-keyed connection registry with enquiry-id correlation
//! - The master-brokered connect handshake
//! - Peer-liveness probing for long blocking waits

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod handshake;
pub mod liveness;
pub mod registry;
pub mod stream;

pub use codec::Timeout;
pub use config::{ConfigError, LinkConfig};
pub use entry::{Bookkeeping, ConnStatus, ConnectionEntry, EndpointKind, PeerAddr};
pub use error::{ConnectFailReason, LinkError};
pub use handshake::{
    await_magic, connect_hb_proc, connect_info, connect_to_server, verify_magic, MAX_BOOT_RETRIES,
};
pub use liveness::{peer_alive, AliveCheckMode};
pub use registry::{
    make_enquiry_id, split_enquiry_id, ConnectionRegistry, RegistryHandle, SharedEntry,
};
pub use stream::LinkStream;
