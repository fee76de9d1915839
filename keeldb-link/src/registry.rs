//! Host-keyed connection registry.
//!
//! Owns the set of live connection entries for a process. Constructed once
//! and injected into the handshake and heartbeat layers; there is no global
//! connection list.

use crate::entry::ConnectionEntry;
use crate::error::LinkError;
use crate::stream::LinkStream;
use dashmap::DashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A registered connection entry, shared with its single I/O owner.
pub type SharedEntry = Arc<Mutex<ConnectionEntry<LinkStream>>>;

/// Opaque handle returned by [`ConnectionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHandle {
    host: String,
    id: u16,
}

impl RegistryHandle {
    /// Returns the host key this handle was registered under.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the small integer id used for enquiry-id construction.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Builds the 32-bit enquiry id correlating an asynchronous request
    /// with its eventual reply.
    pub fn enquiry_id(&self, request_id: u16) -> u32 {
        make_enquiry_id(self.id, request_id)
    }
}

/// Combines a registry entry id and a request id into an enquiry id.
pub fn make_enquiry_id(entry_id: u16, request_id: u16) -> u32 {
    ((entry_id as u32) << 16) | request_id as u32
}

/// Splits an enquiry id back into `(entry_id, request_id)`.
pub fn split_enquiry_id(enquiry_id: u32) -> (u16, u16) {
    ((enquiry_id >> 16) as u16, (enquiry_id & 0xFFFF) as u16)
}

struct Slot {
    id: u16,
    fd: Option<RawFd>,
    entry: SharedEntry,
}

/// Process-wide registry of live connections, keyed by host.
pub struct ConnectionRegistry {
    hosts: DashMap<String, Slot>,
    next_id: AtomicU16,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            hosts: DashMap::new(),
            next_id: AtomicU16::new(1),
        }
    }

    /// Inserts an entry under `host` and returns its handle.
    ///
    /// A live entry already registered under the same host is replaced and
    /// returned so the caller can close it; no two live entries ever share
    /// a host key.
    pub fn register(
        &self,
        host: impl Into<String>,
        entry: ConnectionEntry<LinkStream>,
    ) -> (RegistryHandle, Option<SharedEntry>) {
        let host = host.into();
        let id = self.fresh_id();
        let slot = Slot {
            id,
            fd: entry.raw_fd(),
            entry: Arc::new(Mutex::new(entry)),
        };
        let replaced = self.hosts.insert(host.clone(), slot).map(|old| {
            tracing::warn!("replacing existing connection entry for host '{}'", host);
            old.entry
        });
        tracing::debug!("registered connection for host '{}' (id {})", host, id);
        (RegistryHandle { host, id }, replaced)
    }

    /// Looks up the live entry for `host`.
    pub fn lookup(&self, host: &str) -> Result<SharedEntry, LinkError> {
        self.hosts
            .get(host)
            .map(|slot| slot.entry.clone())
            .ok_or_else(|| LinkError::HostNotFound(host.to_string()))
    }

    /// Looks up an entry by its socket descriptor.
    pub fn lookup_by_fd(&self, fd: RawFd) -> Option<SharedEntry> {
        self.hosts
            .iter()
            .find(|slot| slot.fd == Some(fd))
            .map(|slot| slot.entry.clone())
    }

    /// Unlinks the entry this handle refers to, returning it for closing.
    ///
    /// A stale handle (its host since re-registered under a new id) removes
    /// nothing.
    pub fn remove(&self, handle: &RegistryHandle) -> Option<SharedEntry> {
        let removed = self
            .hosts
            .remove_if(&handle.host, |_, slot| slot.id == handle.id)
            .map(|(_, slot)| slot.entry);
        if removed.is_some() {
            tracing::debug!("removed connection for host '{}'", handle.host);
        }
        removed
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Closes every live entry and clears the map.
    pub async fn shutdown(&self) {
        let entries: Vec<SharedEntry> = self
            .hosts
            .iter()
            .map(|slot| slot.entry.clone())
            .collect();
        self.hosts.clear();
        for entry in entries {
            let mut entry = entry.lock().await;
            entry.bookkeeping().lock().stop_requested = true;
            entry.close().await;
        }
        tracing::info!("connection registry shut down");
    }

    fn fresh_id(&self) -> u16 {
        // Ids pack into the upper half of an enquiry id; skip 0 so a bare
        // request id is never mistaken for an enquiry id.
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
