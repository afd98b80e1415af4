//! Bidirectional byte pump for one session
//!
//! ```text
//!   tcp reader ──┐                         ┌──> tunnel.write
//!                ├── intake (bounded) ── pump
//! tunnel reader ─┘                         └──> tcp.write
//! ```
//!
//! The pump loop is the only writer on either stream. Any end of stream,
//! read error or write error ends the pump, which then asks the registry
//! to unregister the session exactly once. Closing the streams is left to
//! the registry; the reader still blocked on the surviving side is
//! released when the registry closes that stream.

use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::registry::RegistryHandle;
use crate::session::SharedStream;

/// Default read buffer per side
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default number of chunks queued between the readers and the pump
pub const DEFAULT_INTAKE_CAPACITY: usize = 64;

/// Bridge tuning shared by every session of a registry
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub buffer_size: usize,
    pub intake_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}

impl BridgeConfig {
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Tcp,
    Tunnel,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Tcp => Side::Tunnel,
            Side::Tunnel => Side::Tcp,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Tcp => write!(f, "tcp"),
            Side::Tunnel => write!(f, "tunnel"),
        }
    }
}

/// Why a bridge stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The given side ended its stream
    EndOfStream(Side),
    /// Reading from the given side failed
    ReadFailed(Side, String),
    /// Writing to the given side failed
    WriteFailed(Side, String),
    /// Both readers went away without a sentinel
    IntakeClosed,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::EndOfStream(side) => write!(f, "{} closed", side),
            Termination::ReadFailed(side, e) => write!(f, "{} read failed: {}", side, e),
            Termination::WriteFailed(side, e) => write!(f, "{} write failed: {}", side, e),
            Termination::IntakeClosed => write!(f, "intake closed"),
        }
    }
}

/// Result of a finished bridge
#[derive(Debug, Clone)]
pub struct BridgeOutcome {
    pub session_id: String,
    pub termination: Termination,
    pub tcp_to_tunnel: u64,
    pub tunnel_to_tcp: u64,
}

enum Intake {
    Data(Side, Bytes),
    Closed(Side, Option<String>),
}

/// Pump between the two streams of one registered session
pub struct Bridge {
    session_id: String,
    serial: Option<u64>,
    tcp: SharedStream,
    tunnel: SharedStream,
    registry: RegistryHandle,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(
        session_id: impl Into<String>,
        tcp: SharedStream,
        tunnel: SharedStream,
        registry: RegistryHandle,
        config: BridgeConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            serial: None,
            tcp,
            tunnel,
            registry,
            config,
        }
    }

    /// Tie the unregister request to one registration of the id
    pub(crate) fn with_serial(mut self, serial: u64) -> Self {
        self.serial = Some(serial);
        self
    }

    fn stream(&self, side: Side) -> &SharedStream {
        match side {
            Side::Tcp => &self.tcp,
            Side::Tunnel => &self.tunnel,
        }
    }

    /// Pump until either side stops, then request unregistration
    pub async fn run(self) -> BridgeOutcome {
        let (intake_tx, mut intake_rx) = mpsc::channel(self.config.intake_capacity.max(1));
        let buffer_size = self.config.buffer_size.max(1);

        tokio::spawn(read_side(
            Side::Tcp,
            self.tcp.clone(),
            buffer_size,
            intake_tx.clone(),
        ));
        tokio::spawn(read_side(
            Side::Tunnel,
            self.tunnel.clone(),
            buffer_size,
            intake_tx,
        ));

        debug!(session_id = %self.session_id, "Bridge started");

        let mut tcp_to_tunnel: u64 = 0;
        let mut tunnel_to_tcp: u64 = 0;

        let termination = loop {
            let Some(intake) = intake_rx.recv().await else {
                break Termination::IntakeClosed;
            };

            match intake {
                Intake::Data(from, chunk) => {
                    let to = from.other();
                    if let Err(e) = self.stream(to).write(&chunk).await {
                        break Termination::WriteFailed(to, e.to_string());
                    }
                    match from {
                        Side::Tcp => tcp_to_tunnel += chunk.len() as u64,
                        Side::Tunnel => tunnel_to_tcp += chunk.len() as u64,
                    }
                }
                Intake::Closed(side, None) => break Termination::EndOfStream(side),
                Intake::Closed(side, Some(e)) => break Termination::ReadFailed(side, e),
            }
        };

        // Readers still running notice the dropped intake on their next send
        drop(intake_rx);

        info!(
            session_id = %self.session_id,
            tcp_to_tunnel,
            tunnel_to_tcp,
            "Bridge finished: {}",
            termination
        );

        self.registry
            .request_unregister(&self.session_id, self.serial)
            .await;

        BridgeOutcome {
            session_id: self.session_id,
            termination,
            tcp_to_tunnel,
            tunnel_to_tcp,
        }
    }
}

async fn read_side(
    side: Side,
    stream: SharedStream,
    buffer_size: usize,
    intake: mpsc::Sender<Intake>,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let message = match stream.read(&mut buf).await {
            Ok(0) => Intake::Closed(side, None),
            // Owned copy, `buf` is reused by the next read
            Ok(n) => Intake::Data(side, Bytes::copy_from_slice(&buf[..n])),
            Err(e) => Intake::Closed(side, Some(e.to_string())),
        };
        let last = matches!(message, Intake::Closed(..));
        if intake.send(message).await.is_err() || last {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Command;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use wsrx_transport::{IoStream, TransportStream};

    fn pipe(name: &str) -> (SharedStream, DuplexStream) {
        let (local, remote) = duplex(4096);
        (Arc::new(IoStream::new(local, name)), remote)
    }

    fn detached_registry() -> (RegistryHandle, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(8);
        (RegistryHandle::from_sender(tx), rx)
    }

    async fn expect_single_unregister(rx: &mut mpsc::Receiver<Command>, id: &str) {
        match rx.recv().await {
            Some(Command::Unregister { id: got, .. }) => assert_eq!(got, id),
            _ => panic!("expected an unregister request"),
        }
        assert!(rx.try_recv().is_err(), "unregister must be sent once");
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let (tcp, mut tcp_peer) = pipe("tcp");
        let (tunnel, mut tunnel_peer) = pipe("tunnel");
        let (registry, mut commands) = detached_registry();

        let bridge = Bridge::new(
            "s1",
            tcp.clone(),
            tunnel.clone(),
            registry,
            BridgeConfig::default(),
        );
        let handle = tokio::spawn(bridge.run());

        tcp_peer.write_all(b"PING").await.unwrap();
        let mut buf = [0u8; 4];
        tunnel_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PING");

        tunnel_peer.write_all(b"PONG").await.unwrap();
        tcp_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PONG");

        drop(tcp_peer);
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("bridge should stop")
            .unwrap();

        assert_eq!(outcome.termination, Termination::EndOfStream(Side::Tcp));
        assert_eq!(outcome.tcp_to_tunnel, 4);
        assert_eq!(outcome.tunnel_to_tcp, 4);
        expect_single_unregister(&mut commands, "s1").await;

        // The bridge never closes streams itself
        assert!(!tcp.is_closed());
        assert!(!tunnel.is_closed());
    }

    #[tokio::test]
    async fn test_small_buffer_preserves_order() {
        let (tcp, mut tcp_peer) = pipe("tcp");
        let (tunnel, mut tunnel_peer) = pipe("tunnel");
        let (registry, _commands) = detached_registry();

        let config = BridgeConfig::default().with_buffer_size(3);
        tokio::spawn(Bridge::new("s1", tcp, tunnel, registry, config).run());

        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let expected = payload.clone();
        tokio::spawn(async move {
            tcp_peer.write_all(&payload).await.unwrap();
            tcp_peer
        });

        let mut received = vec![0u8; expected.len()];
        tunnel_peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_closed_tunnel_terminates_with_one_unregister() {
        let (tcp, _tcp_peer) = pipe("tcp");
        let (tunnel, _tunnel_peer) = pipe("tunnel");
        let (registry, mut commands) = detached_registry();

        let handle = tokio::spawn(
            Bridge::new("s2", tcp, tunnel.clone(), registry, BridgeConfig::default())
                .with_serial(7)
                .run(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        tunnel.close().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("bridge should stop")
            .unwrap();
        assert!(matches!(
            outcome.termination,
            Termination::ReadFailed(Side::Tunnel, _)
        ));

        match commands.recv().await {
            Some(Command::Unregister { id, serial, .. }) => {
                assert_eq!(id, "s2");
                assert_eq!(serial, Some(7));
            }
            _ => panic!("expected an unregister request"),
        }
    }

    #[tokio::test]
    async fn test_stream_closed_before_start_terminates() {
        let (tcp, mut tcp_peer) = pipe("tcp");
        let (tunnel, _tunnel_peer) = pipe("tunnel");
        let (registry, mut commands) = detached_registry();

        tunnel.close().await.unwrap();
        let handle = tokio::spawn(
            Bridge::new("s3", tcp, tunnel, registry, BridgeConfig::default()).run(),
        );

        tcp_peer.write_all(b"data").await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("bridge should stop")
            .unwrap();

        assert!(matches!(
            outcome.termination,
            Termination::ReadFailed(Side::Tunnel, _) | Termination::WriteFailed(Side::Tunnel, _)
        ));
        expect_single_unregister(&mut commands, "s3").await;
    }
}
