//! Scripted master for integration tests.
//!
//! Accepts one connection per script step, runs the accepting side of the
//! magic exchange, and answers the connect command according to the script.
//! Records every `(function_code, payload)` it sees so tests can assert
//! what actually crossed the wire.

use keeldb_link::{await_magic, ConnectionEntry, EndpointKind, LinkConfig, LinkStream, Timeout};
use keeldb_protocol::{ConnectStatus, PacketType, ProtocolVersion};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// One scripted exchange, driven per accepted connection.
pub enum MasterScript {
    /// Magic exchange, then answer the connect command with a status and
    /// an optional redirect port.
    Reply {
        status: ConnectStatus,
        port: Option<u16>,
    },
    /// Like `Reply`, followed by an ERROR packet with readable detail.
    ReplyWithErrorDetail {
        status: ConnectStatus,
        detail: &'static str,
    },
    /// Magic exchange only; record any unexpected follow-up packet.
    /// Used as the redirect target.
    MagicOnly,
    /// Answer the magic exchange with an incompatible major version.
    BadVersionMagic,
    /// Accept a heartbeat registration, send `pings` liveness COMMANDs,
    /// then drop the connection.
    HbSession { pings: usize },
}

/// What the master observed: one `(function_code, payload)` per packet
/// received after the magic exchange.
pub type Observed = Vec<(u16, Vec<u8>)>;

/// Spawns a scripted master; returns its port and a handle resolving to
/// everything it observed.
pub async fn spawn_master(scripts: Vec<MasterScript>) -> (u16, JoinHandle<Observed>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = Arc::new(LinkConfig::default());

    let handle = tokio::spawn(async move {
        let mut observed = Observed::new();
        let reply_timeout = Timeout::Bounded(Duration::from_secs(5));

        for script in scripts {
            let (stream, _) = listener.accept().await.unwrap();
            let mut entry = ConnectionEntry::open(
                LinkStream::Tcp { stream },
                EndpointKind::Server,
                config.clone(),
            );

            if let MasterScript::BadVersionMagic = script {
                let packet = entry.receive(reply_timeout).await.unwrap();
                let newer = ProtocolVersion::new(ProtocolVersion::CURRENT.major + 1, 0, 0);
                entry
                    .send(
                        PacketType::Data,
                        0,
                        packet.header.request_id,
                        &[&0i32.to_be_bytes(), &newer.pack().to_be_bytes()],
                    )
                    .await
                    .unwrap();
                continue;
            }
            await_magic(&mut entry, reply_timeout).await.unwrap();

            match script {
                MasterScript::Reply { status, port } => {
                    let packet = entry.receive(reply_timeout).await.unwrap();
                    record(&mut observed, &packet);
                    send_status(&mut entry, packet.header.request_id, status, port).await;
                }
                MasterScript::ReplyWithErrorDetail { status, detail } => {
                    let packet = entry.receive(reply_timeout).await.unwrap();
                    record(&mut observed, &packet);
                    send_status(&mut entry, packet.header.request_id, status, None).await;
                    entry
                        .send(
                            PacketType::Error,
                            0,
                            packet.header.request_id,
                            &[detail.as_bytes()],
                        )
                        .await
                        .unwrap();
                }
                MasterScript::MagicOnly => {
                    // Anything else arriving here is a protocol violation
                    // the test wants to see.
                    if let Ok(packet) = entry
                        .receive(Timeout::Bounded(Duration::from_millis(300)))
                        .await
                    {
                        record(&mut observed, &packet);
                    }
                }
                MasterScript::HbSession { pings } => {
                    let packet = entry.receive(reply_timeout).await.unwrap();
                    record(&mut observed, &packet);
                    send_status(
                        &mut entry,
                        packet.header.request_id,
                        ConnectStatus::RequestAccepted,
                        None,
                    )
                    .await;
                    for _ in 0..pings {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        entry.send(PacketType::Command, 0, 0, &[]).await.unwrap();
                    }
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    entry.close().await;
                }
                MasterScript::BadVersionMagic => unreachable!(),
            }
        }
        observed
    });

    (port, handle)
}

fn record(observed: &mut Observed, packet: &keeldb_protocol::Packet) {
    let payload = packet.buffer(0).map(|b| b.to_vec()).unwrap_or_default();
    observed.push((packet.header.function_code, payload));
}

async fn send_status(
    entry: &mut ConnectionEntry<LinkStream>,
    request_id: u32,
    status: ConnectStatus,
    port: Option<u16>,
) {
    let mut payload = (status as i32).to_be_bytes().to_vec();
    if let Some(port) = port {
        payload.extend((port as i32).to_be_bytes());
    }
    entry
        .send(PacketType::Data, 0, request_id, &[&payload])
        .await
        .unwrap();
}

/// Client configuration pointed at a scripted master.
pub fn client_config(master_port: u16) -> Arc<LinkConfig> {
    Arc::new(LinkConfig {
        master_port,
        prefer_unix_socket: false,
        connect_timeout_ms: 2_000,
        response_timeout_ms: 2_000,
        boot_retry_delay_ms: 10,
        ..Default::default()
    })
}
