pub mod backoff;
pub mod doctor;
pub mod error;
pub mod frame;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

use backoff::LinkHealth;
use error::RelayError;
use frame::VehicleId;

/// Upper bound on a single wait for inbound datagrams.
pub const INBOUND_WAIT: Duration = Duration::from_secs(1);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub vehicle_id: String,
    pub serial_dev: String,
    pub baud: u32,
    pub server_host: String,
    pub server_port: u16,
    /// Local UDP bind address. Default `0.0.0.0:0`.
    pub bind_addr: Option<String>,
}

impl RelayConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or("0.0.0.0:0")
    }
}

#[derive(Debug, Clone)]
pub struct RelaySession {
    pub vehicle_id: VehicleId,
    pub local_transport: String,
    pub remote_endpoint: SocketAddr,
    pub last_heartbeat_at: Option<OffsetDateTime>,
}

/// Running bridge. Dropping it stops all three loops.
pub struct RelayHandle {
    session: RelaySession,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    last_heartbeat: watch::Receiver<Option<OffsetDateTime>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn session(&self) -> RelaySession {
        RelaySession { last_heartbeat_at: *self.last_heartbeat.borrow(), ..self.session.clone() }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for t in self.tasks {
            let _ = t.await;
        }
    }
}

/// Opens the serial device, then announces the vehicle and starts relaying.
/// Nothing is sent to the server when the device cannot be opened.
pub async fn start(cfg: &RelayConfig) -> Result<RelayHandle, RelayError> {
    let id = VehicleId::parse(&cfg.vehicle_id)?;
    let serial = tokio_serial::new(&cfg.serial_dev, cfg.baud)
        .open_native_async()
        .map_err(|e| RelayError::LocalTransport { dev: cfg.serial_dev.clone(), source: e.into() })?;
    info!("relay: serial {} @ {} open", cfg.serial_dev, cfg.baud);

    start_with_transport(id, serial, cfg.serial_dev.clone(), &cfg.endpoint(), cfg.bind_addr()).await
}

pub async fn start_with_transport<T>(
    id: VehicleId,
    local: T,
    local_label: String,
    endpoint: &str,
    bind_addr: &str,
) -> Result<RelayHandle, RelayError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let remote = |source: io::Error| RelayError::Remote { endpoint: endpoint.to_string(), source };

    let socket = UdpSocket::bind(bind_addr).await.map_err(remote)?;
    socket.connect(endpoint).await.map_err(remote)?;
    socket.send(&frame::handshake(&id)).await.map_err(remote)?;
    let remote_endpoint = socket.peer_addr().map_err(remote)?;
    let local_addr = socket.local_addr().map_err(remote)?;
    info!("relay: {} registered with {} (local {})", id, remote_endpoint, local_addr);

    let socket = Arc::new(socket);
    let (reader, writer) = tokio::io::split(local);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (hb_tx, hb_rx) = watch::channel(None);

    let tasks = vec![
        tokio::spawn(outbound(reader, socket.clone(), id.clone(), shutdown_rx.clone())),
        tokio::spawn(inbound(writer, socket.clone(), id.clone(), shutdown_rx.clone())),
        tokio::spawn(heartbeat(socket, id.clone(), hb_tx, shutdown_rx)),
    ];

    Ok(RelayHandle {
        session: RelaySession { vehicle_id: id, local_transport: local_label, remote_endpoint, last_heartbeat_at: None },
        local_addr,
        shutdown: shutdown_tx,
        last_heartbeat: hb_rx,
        tasks,
    })
}

/// Sleeps for `d` unless shutdown arrives first. Returns true on shutdown.
async fn pause(d: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(d) => false,
    }
}

/// Each read takes everything the local transport has buffered, up to the
/// largest payload one datagram can carry after the id prefix.
async fn outbound<R>(mut local: R, socket: Arc<UdpSocket>, id: VehicleId, mut shutdown: watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; MAX_DATAGRAM - id.as_str().len() - 1];
    let mut health = LinkHealth::default();

    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            r = local.read(&mut buf) => r,
        };

        let res = match read {
            Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "local transport closed")),
            Ok(n) => socket.send(&frame::data_frame(&id, &buf[..n])).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match res {
            Ok(()) => health.on_success(),
            Err(e) => {
                let wait = health.on_failure();
                warn!("relay: serial->udp failed ({} in a row): {}", health.consecutive_failures, e);
                if pause(wait, &mut shutdown).await {
                    break;
                }
            }
        }
    }
    debug!("relay: outbound loop stopped");
}

async fn inbound<W>(mut local: W, socket: Arc<UdpSocket>, id: VehicleId, mut shutdown: watch::Receiver<bool>)
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut health = LinkHealth::default();

    loop {
        let recv = tokio::select! {
            _ = shutdown.changed() => break,
            r = tokio::time::timeout(INBOUND_WAIT, socket.recv(&mut buf)) => r,
        };

        let res = match recv {
            Err(_elapsed) => continue,
            Ok(Err(e)) => Err(e),
            Ok(Ok(n)) => match frame::strip_data_frame(&id, &buf[..n]) {
                None => {
                    trace!("relay: dropped {} byte datagram not addressed to {}", n, id);
                    continue;
                }
                Some([]) => continue,
                Some(payload) => match local.write_all(payload).await {
                    Ok(()) => local.flush().await,
                    Err(e) => Err(e),
                },
            },
        };

        match res {
            Ok(()) => health.on_success(),
            Err(e) => {
                let wait = health.on_failure();
                warn!("relay: udp->serial failed ({} in a row): {}", health.consecutive_failures, e);
                if pause(wait, &mut shutdown).await {
                    break;
                }
            }
        }
    }
    debug!("relay: inbound loop stopped");
}

async fn heartbeat(
    socket: Arc<UdpSocket>,
    id: VehicleId,
    last: watch::Sender<Option<OffsetDateTime>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let msg = frame::heartbeat(&id);
    let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }
        match socket.send(&msg).await {
            Ok(_) => {
                last.send_replace(Some(OffsetDateTime::now_utc()));
                debug!("relay: heartbeat {}", id);
            }
            Err(e) => warn!("relay: heartbeat failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const WAIT: Duration = Duration::from_secs(2);

    async fn server() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    /// Next datagram that is not a liveness message.
    async fn recv_non_heartbeat(server: &UdpSocket) -> (Vec<u8>, SocketAddr) {
        let mut buf = vec![0u8; 2048];
        loop {
            let (n, from) = tokio::time::timeout(WAIT, server.recv_from(&mut buf)).await.unwrap().unwrap();
            if !buf[..n].starts_with(b"HEARTBEAT:") {
                return (buf[..n].to_vec(), from);
            }
        }
    }

    async fn bridge(id: &str, server: &UdpSocket) -> (RelayHandle, DuplexStream) {
        bridge_with_capacity(id, server, 4096).await
    }

    async fn bridge_with_capacity(id: &str, server: &UdpSocket, capacity: usize) -> (RelayHandle, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(capacity);
        let endpoint = server.local_addr().unwrap().to_string();
        let handle = start_with_transport(VehicleId::parse(id).unwrap(), ours, "duplex".into(), &endpoint, "127.0.0.1:0")
            .await
            .unwrap();
        (handle, theirs)
    }

    #[tokio::test]
    async fn missing_serial_device_sends_nothing() {
        let server = server().await;
        let cfg = RelayConfig {
            vehicle_id: "drone1".into(),
            serial_dev: "/dev/skylink-test-missing".into(),
            baud: 57600,
            server_host: "127.0.0.1".into(),
            server_port: server.local_addr().unwrap().port(),
            bind_addr: Some("127.0.0.1:0".into()),
        };

        let err = start(&cfg).await.err().unwrap();
        assert!(matches!(err, RelayError::LocalTransport { .. }));

        let mut buf = [0u8; 64];
        let got = tokio::time::timeout(Duration::from_millis(300), server.recv_from(&mut buf)).await;
        assert!(got.is_err(), "server received a datagram");
    }

    #[tokio::test]
    async fn invalid_id_fails_before_anything_opens() {
        let cfg = RelayConfig {
            vehicle_id: "drone:1".into(),
            serial_dev: "/dev/skylink-test-missing".into(),
            baud: 57600,
            server_host: "127.0.0.1".into(),
            server_port: 9,
            bind_addr: None,
        };
        assert!(matches!(start(&cfg).await, Err(RelayError::InvalidVehicleId { .. })));
    }

    #[tokio::test]
    async fn handshake_precedes_data_and_frames_carry_id() {
        let server = server().await;
        let (handle, mut fc) = bridge("drone1", &server).await;

        let (first, from) = recv_non_heartbeat(&server).await;
        assert_eq!(first, b"DRONE:drone1");
        assert_eq!(from, handle.local_addr());

        fc.write_all(&[0xFD, 0x01, 0x02]).await.unwrap();
        let (data, _) = recv_non_heartbeat(&server).await;
        assert_eq!(data, b"drone1:\xFD\x01\x02");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn buffered_burst_goes_out_as_one_datagram() {
        let server = server().await;
        let (handle, mut fc) = bridge_with_capacity("drone1", &server, 64 * 1024).await;
        let (first, _) = recv_non_heartbeat(&server).await;
        assert_eq!(first, b"DRONE:drone1");

        let burst: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fc.write_all(&burst).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = loop {
            let (n, _) = tokio::time::timeout(WAIT, server.recv_from(&mut buf)).await.unwrap().unwrap();
            if !buf[..n].starts_with(b"HEARTBEAT:") {
                break n;
            }
        };
        assert_eq!(n, "drone1:".len() + burst.len());
        assert_eq!(&buf[..7], b"drone1:");
        assert_eq!(&buf[7..n], &burst[..]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn only_exact_id_prefix_reaches_serial() {
        let server = server().await;
        let (handle, mut fc) = bridge("drone1", &server).await;
        let (_, bridge_addr) = recv_non_heartbeat(&server).await;

        server.send_to(b"drone10:xyz", bridge_addr).await.unwrap();
        server.send_to(b"HEARTBEAT:drone1", bridge_addr).await.unwrap();
        server.send_to(b"drone1:\x01\x02", bridge_addr).await.unwrap();

        let mut got = [0u8; 2];
        tokio::time::timeout(WAIT, fc.read_exact(&mut got)).await.unwrap().unwrap();
        assert_eq!(got, [0x01, 0x02]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn heartbeat_is_sent_and_recorded() {
        let server = server().await;
        let (handle, _fc) = bridge("rover-7", &server).await;

        let mut buf = [0u8; 64];
        let mut saw = false;
        for _ in 0..3 {
            let (n, _) = tokio::time::timeout(WAIT, server.recv_from(&mut buf)).await.unwrap().unwrap();
            if &buf[..n] == b"HEARTBEAT:rover-7" {
                saw = true;
                break;
            }
        }
        assert!(saw);

        tokio::time::timeout(WAIT, async {
            while handle.session().last_heartbeat_at.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.session().vehicle_id.as_str(), "rover-7");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_joins_all_loops() {
        let server = server().await;
        let (handle, _fc) = bridge("drone1", &server).await;
        tokio::time::timeout(WAIT, handle.shutdown()).await.unwrap();
    }
}
