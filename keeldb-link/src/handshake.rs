//! Master-brokered connect handshake.
//!
//! One state machine drives all three connect paths: client-to-server
//! (with boot retry and redirect handling), administrative info
//! connections, and heartbeat process registration. The paths share the
//! transport connect, the magic/version exchange, and the connect COMMAND
//! round trip, and diverge only in status dispatch.

use crate::codec::Timeout;
use crate::config::LinkConfig;
use crate::entry::{ConnectionEntry, EndpointKind};
use crate::error::{ConnectFailReason, LinkError};
use crate::registry::{ConnectionRegistry, RegistryHandle, SharedEntry};
use crate::stream::LinkStream;
use keeldb_protocol::{
    ConnectStatus, ConnectType, Packet, PacketType, ProtocolError, ProtocolVersion, MAGIC,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Handshake attempts while the target server reports it is still booting.
pub const MAX_BOOT_RETRIES: u32 = 20;

/// Connects to the named database server through the master.
///
/// On success the connection is wrapped in an entry and registered in the
/// registry keyed by `host`; on any failure the connection is torn down and
/// nothing is left registered.
pub async fn connect_to_server(
    config: &Arc<LinkConfig>,
    registry: &ConnectionRegistry,
    host: &str,
    server_name: &str,
) -> Result<(RegistryHandle, SharedEntry), LinkError> {
    for attempt in 1..=MAX_BOOT_RETRIES {
        let mut entry = open_and_verify(config, host).await?;
        let (status, port) =
            match request_connect(&mut entry, ConnectType::ToServer, server_name.as_bytes()).await
            {
                Ok(reply) => reply,
                Err(e) => {
                    entry.close().await;
                    return Err(io_connect_failed(server_name, e));
                }
            };

        match status {
            ConnectStatus::Connected => {
                tracing::info!(
                    "connected to server '{}' via master {} (attempt {})",
                    server_name,
                    host,
                    attempt
                );
                return finish_register(registry, host, entry).await;
            }
            ConnectStatus::Started => {
                // Server still booting; retry the whole handshake.
                tracing::debug!(
                    "server '{}' still starting (attempt {}/{})",
                    server_name,
                    attempt,
                    MAX_BOOT_RETRIES
                );
                entry.close().await;
                tokio::time::sleep(config.boot_retry_delay()).await;
            }
            ConnectStatus::ConnectedNew => {
                // One-shot redirect: dial the returned port directly; the
                // master already resolved the server name.
                let port = match port {
                    Some(port) => port,
                    None => {
                        entry.close().await;
                        return Err(LinkError::Protocol(ProtocolError::PayloadTooShort {
                            got: 4,
                            need: 8,
                        }));
                    }
                };
                entry.close().await;
                tracing::debug!("master redirected '{}' to port {}", server_name, port);
                let redirected = open_and_verify_port(config, host, port).await?;
                return finish_register(registry, host, redirected).await;
            }
            status => {
                let detail = if status.carries_error_detail() {
                    drain_error_detail(&mut entry).await
                } else {
                    None
                };
                entry.close().await;
                return Err(LinkError::ConnectFailed {
                    target: server_name.to_string(),
                    reason: ConnectFailReason::Status { status, detail },
                });
            }
        }
    }

    Err(LinkError::ConnectFailed {
        target: server_name.to_string(),
        reason: ConnectFailReason::RetriesExhausted(MAX_BOOT_RETRIES),
    })
}

/// Connects an administrative/info client to the master itself.
///
/// Performs the transport connect and magic exchange plus a single
/// request/reply round trip; there is no server redirect on this path.
pub async fn connect_info(
    config: &Arc<LinkConfig>,
    host: &str,
) -> Result<ConnectionEntry<LinkStream>, LinkError> {
    let mut entry = open_and_verify(config, host).await?;
    match request_connect(&mut entry, ConnectType::Info, &[]).await {
        Ok((ConnectStatus::Connected | ConnectStatus::RequestAccepted, _)) => {
            tracing::info!("info connection to master {} established", host);
            Ok(entry)
        }
        Ok((status, _)) => {
            let detail = if status.carries_error_detail() {
                drain_error_detail(&mut entry).await
            } else {
                None
            };
            entry.close().await;
            Err(LinkError::ConnectFailed {
                target: host.to_string(),
                reason: ConnectFailReason::Status { status, detail },
            })
        }
        Err(e) => {
            entry.close().await;
            Err(io_connect_failed(host, e))
        }
    }
}

/// Opens a heartbeat registration channel to the master, carrying the
/// process descriptor as the connect payload.
pub async fn connect_hb_proc(
    config: &Arc<LinkConfig>,
    host: &str,
    descriptor: &[u8],
) -> Result<ConnectionEntry<LinkStream>, LinkError> {
    let mut entry = open_and_verify(config, host).await?;
    match request_connect(&mut entry, ConnectType::HbProc, descriptor).await {
        Ok((ConnectStatus::RequestAccepted, _)) => {
            tracing::info!("heartbeat registration accepted by master {}", host);
            Ok(entry)
        }
        Ok((status, _)) => {
            let detail = if status.carries_error_detail() {
                drain_error_detail(&mut entry).await
            } else {
                None
            };
            entry.close().await;
            Err(LinkError::ConnectFailed {
                target: host.to_string(),
                reason: ConnectFailReason::Status { status, detail },
            })
        }
        Err(e) => {
            entry.close().await;
            Err(io_connect_failed(host, e))
        }
    }
}

/// Client side of the magic/version exchange.
///
/// Runs before any application traffic; a nonzero peer status or a major
/// version mismatch tears the handshake down.
pub async fn verify_magic<S>(entry: &mut ConnectionEntry<S>) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let local = ProtocolVersion::CURRENT;
    let rid = entry.next_request_id() as u32;
    let packed = local.pack().to_be_bytes();
    entry
        .send(PacketType::Data, 0, rid, &[&MAGIC, &packed])
        .await?;

    let timeout = Timeout::Bounded(entry.config.response_timeout());
    let reply = entry.receive_reply(rid, timeout).await?;
    if reply.header.packet_type != PacketType::Data {
        return Err(LinkError::WrongPacketType {
            expected: PacketType::Data,
            got: reply.header.packet_type,
        });
    }

    let status = buffer_i32(&reply, 0)?;
    let peer = ProtocolVersion::unpack(buffer_u32(&reply, 1)?);
    entry.set_peer_version(peer);
    if status != 0 || !local.compatible_with(&peer) {
        return Err(LinkError::NotCompatibleVersion { local, peer });
    }
    tracing::debug!("version exchange ok: peer speaks {}", peer);
    Ok(())
}

/// Accepting side of the magic/version exchange.
///
/// Validates the token, answers with our own version, and fails with
/// `NotCompatibleVersion` on a major mismatch — the gate holds regardless
/// of which side initiated.
pub async fn await_magic<S>(
    entry: &mut ConnectionEntry<S>,
    timeout: Timeout,
) -> Result<ProtocolVersion, LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let packet = entry.receive(timeout).await?;
    if packet.header.packet_type != PacketType::Data {
        return Err(LinkError::WrongPacketType {
            expected: PacketType::Data,
            got: packet.header.packet_type,
        });
    }

    let token = packet
        .buffer(0)
        .ok_or(ProtocolError::PayloadTooShort { got: 0, need: 4 })?;
    if token.len() < 4 {
        return Err(LinkError::Protocol(ProtocolError::PayloadTooShort {
            got: token.len(),
            need: 4,
        }));
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&token[..4]);
    if magic != MAGIC {
        return Err(LinkError::Protocol(ProtocolError::InvalidMagic(magic)));
    }

    let peer = ProtocolVersion::unpack(buffer_u32(&packet, 1)?);
    let local = ProtocolVersion::CURRENT;
    let compatible = local.compatible_with(&peer);
    let status: i32 = if compatible { 0 } else { 1 };
    entry
        .send(
            PacketType::Data,
            0,
            packet.header.request_id,
            &[&status.to_be_bytes(), &local.pack().to_be_bytes()],
        )
        .await?;

    entry.set_peer_version(peer);
    if !compatible {
        return Err(LinkError::NotCompatibleVersion { local, peer });
    }
    Ok(peer)
}

/// Opens a transport to the master and runs the magic exchange.
async fn open_and_verify(
    config: &Arc<LinkConfig>,
    host: &str,
) -> Result<ConnectionEntry<LinkStream>, LinkError> {
    let stream = open_master_transport(config, host).await?;
    wrap_and_verify(stream, config).await
}

/// Redirect target: plain TCP to the port the master handed back.
async fn open_and_verify_port(
    config: &Arc<LinkConfig>,
    host: &str,
    port: u16,
) -> Result<ConnectionEntry<LinkStream>, LinkError> {
    let stream = LinkStream::connect_tcp_host(host, port, config).await?;
    wrap_and_verify(stream, config).await
}

async fn wrap_and_verify(
    stream: LinkStream,
    config: &Arc<LinkConfig>,
) -> Result<ConnectionEntry<LinkStream>, LinkError> {
    let mut entry = ConnectionEntry::open(stream, EndpointKind::Client, config.clone());
    match verify_magic(&mut entry).await {
        Ok(()) => Ok(entry),
        Err(e) => {
            entry.close().await;
            Err(e)
        }
    }
}

/// Chooses the master transport: the Unix socket for a local master when
/// present, TCP otherwise.
async fn open_master_transport(config: &LinkConfig, host: &str) -> Result<LinkStream, LinkError> {
    if config.prefer_unix_socket && is_local_host(host) {
        let path = config.master_socket_path();
        if path.exists() {
            return LinkStream::connect_unix(&path, config).await;
        }
        tracing::debug!("master socket {} absent, using TCP", path.display());
    }
    LinkStream::connect_tcp_host(host, config.master_port, config).await
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Sends the connect COMMAND and parses the `(status, optional port)` reply.
async fn request_connect<S>(
    entry: &mut ConnectionEntry<S>,
    connect_type: ConnectType,
    payload: &[u8],
) -> Result<(ConnectStatus, Option<u16>), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let rid = entry.next_request_id() as u32;
    let buffers: &[&[u8]] = if payload.is_empty() { &[] } else { &[payload] };
    entry
        .send(PacketType::Command, connect_type as u16, rid, buffers)
        .await?;

    let timeout = Timeout::Bounded(entry.config.response_timeout());
    let reply = entry.receive_reply(rid, timeout).await?;
    if reply.header.packet_type != PacketType::Data {
        return Err(LinkError::WrongPacketType {
            expected: PacketType::Data,
            got: reply.header.packet_type,
        });
    }

    let status = ConnectStatus::try_from(buffer_i32(&reply, 0)?).map_err(LinkError::Protocol)?;
    let port = reply
        .buffer(0)
        .and_then(|buf| read_i32(buf, 4))
        .map(|p| p as u16);
    Ok((status, port))
}

/// Drains the ERROR packet the master sends after some hard failures.
async fn drain_error_detail<S>(entry: &mut ConnectionEntry<S>) -> Option<String>
where
    S: AsyncRead + Unpin,
{
    let timeout = Timeout::Bounded(entry.config.response_timeout());
    match entry.receive(timeout).await {
        Ok(packet) => packet
            .error_blob()
            .map(|blob| String::from_utf8_lossy(blob).into_owned()),
        Err(e) => {
            tracing::debug!("no error detail drained: {}", e);
            None
        }
    }
}

async fn finish_register(
    registry: &ConnectionRegistry,
    host: &str,
    entry: ConnectionEntry<LinkStream>,
) -> Result<(RegistryHandle, SharedEntry), LinkError> {
    let (handle, replaced) = registry.register(host, entry);
    if let Some(old) = replaced {
        old.lock().await.close().await;
    }
    let shared = registry.lookup(host)?;
    Ok((handle, shared))
}

/// Wraps mid-handshake I/O errors per the teardown contract; gate and
/// status failures keep their own kinds.
fn io_connect_failed(target: &str, err: LinkError) -> LinkError {
    match err {
        e @ (LinkError::NotCompatibleVersion { .. } | LinkError::ConnectFailed { .. }) => e,
        e => LinkError::ConnectFailed {
            target: target.to_string(),
            reason: ConnectFailReason::Io(e.to_string()),
        },
    }
}

fn buffer_i32(packet: &Packet, index: usize) -> Result<i32, LinkError> {
    let buf = packet
        .buffer(index)
        .ok_or(ProtocolError::PayloadTooShort { got: 0, need: 4 })?;
    read_i32(buf, 0).ok_or_else(|| {
        LinkError::Protocol(ProtocolError::PayloadTooShort {
            got: buf.len(),
            need: 4,
        })
    })
}

fn buffer_u32(packet: &Packet, index: usize) -> Result<u32, LinkError> {
    buffer_i32(packet, index).map(|v| v as u32)
}

fn read_i32(buf: &[u8], at: usize) -> Option<i32> {
    let bytes = buf.get(at..at + 4)?;
    let mut arr = [0u8; 4];
    arr.copy_from_slice(bytes);
    Some(i32::from_be_bytes(arr))
}
