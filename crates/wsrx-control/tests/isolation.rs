//! Many sessions bridged at once must never mix their bytes

use rand::{Rng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use wsrx_control::{BridgeConfig, ConnectionRegistry, Role, Session, SessionMeta, SharedStream};
use wsrx_transport::IoStream;

const SESSIONS: usize = 24;

fn random_payloads(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut up = vec![0u8; rng.gen_range(1..32 * 1024)];
            let mut down = vec![0u8; rng.gen_range(1..32 * 1024)];
            rng.fill_bytes(&mut up);
            rng.fill_bytes(&mut down);
            (up, down)
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_stay_isolated() {
    let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
    let payloads = random_payloads(SESSIONS);

    let mut checks = Vec::new();
    for (i, (up, down)) in payloads.into_iter().enumerate() {
        let (tcp, tcp_peer) = duplex(2048);
        let (tunnel, tunnel_peer) = duplex(2048);
        let tcp: SharedStream = Arc::new(IoStream::new(tcp, format!("tcp-{i}")));
        let tunnel: SharedStream = Arc::new(IoStream::new(tunnel, format!("tunnel-{i}")));
        let meta = SessionMeta::new(Role::Client, format!("127.0.0.1:{}", 40000 + i), "ws://test");
        registry
            .register(Session::new(format!("session-{i}"), tcp, tunnel, meta))
            .await
            .unwrap();

        checks.push(tokio::spawn(async move {
            let (mut tcp_read, mut tcp_write) = tokio::io::split(tcp_peer);
            let (mut tunnel_read, mut tunnel_write) = tokio::io::split(tunnel_peer);

            let send_up = tcp_write.write_all(&up);
            let send_down = tunnel_write.write_all(&down);

            let mut got_up = vec![0u8; up.len()];
            let mut got_down = vec![0u8; down.len()];
            let recv_up = tunnel_read.read_exact(&mut got_up);
            let recv_down = tcp_read.read_exact(&mut got_down);

            let (a, b, c, d) = tokio::join!(send_up, send_down, recv_up, recv_down);
            a.unwrap();
            b.unwrap();
            c.unwrap();
            d.unwrap();

            assert_eq!(got_up, up, "session {i} upstream corrupted");
            assert_eq!(got_down, down, "session {i} downstream corrupted");
        }));
    }

    for check in checks {
        tokio::time::timeout(Duration::from_secs(10), check)
            .await
            .expect("session transfer timed out")
            .unwrap();
    }
}
