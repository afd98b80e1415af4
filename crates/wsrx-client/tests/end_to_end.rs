//! Client and server together: local TCP -> client -> WebSocket -> server -> backend

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wsrx_api::{ApiServer, ApiServerConfig};
use wsrx_client::{ClientConfig, TunnelClient};
use wsrx_control::{BridgeConfig, ConnectionRegistry, RegistryHandle, Role};
use wsrx_relay_db::{MappingStore, MemoryMappingStore};

/// Backend that echoes every byte back
async fn start_echo_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn start_server(mapping_id: &str, backend: &str) -> (String, RegistryHandle) {
    let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
    let store = Arc::new(MemoryMappingStore::new());
    store.put(mapping_id, backend).await.unwrap();

    let server = ApiServer::new(ApiServerConfig::default(), store, registry.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_with_listener(listener));

    (format!("ws://{}/traffic/{}", addr, mapping_id), registry)
}

async fn start_client(remote_url: &str) -> (std::net::SocketAddr, RegistryHandle) {
    let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
    let config = ClientConfig::builder()
        .remote_url(remote_url)
        .connect_timeout(Some(Duration::from_secs(5)))
        .build()
        .unwrap();
    let client = TunnelClient::bind(config, registry.clone()).await.unwrap();
    let addr = client.local_addr().unwrap();
    tokio::spawn(client.run());
    (addr, registry)
}

async fn wait_for_sessions(registry: &RegistryHandle, count: usize) {
    for _ in 0..200 {
        if registry.list().await.unwrap().len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} live sessions", count);
}

#[tokio::test]
async fn test_echo_through_client_and_server() {
    let backend = start_echo_backend().await;
    let (remote_url, server_registry) = start_server("echo", &backend).await;
    let (local, client_registry) = start_client(&remote_url).await;

    let mut socket = TcpStream::connect(local).await.unwrap();
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

    let (mut reader, mut writer) = socket.split();
    let send = async {
        writer.write_all(&payload).await.unwrap();
    };
    let mut echoed = vec![0u8; payload.len()];
    let receive = async {
        tokio::time::timeout(Duration::from_secs(5), reader.read_exact(&mut echoed))
            .await
            .expect("echo should arrive")
            .unwrap();
    };
    tokio::join!(send, receive);
    assert_eq!(echoed, payload);

    let client_sessions = client_registry.list().await.unwrap();
    assert_eq!(client_sessions.len(), 1);
    assert_eq!(client_sessions[0].meta.role, Role::Client);
    assert_eq!(client_sessions[0].meta.target, remote_url);
    wait_for_sessions(&server_registry, 1).await;

    // Closing the local connection tears down both ends
    drop(socket);
    wait_for_sessions(&client_registry, 0).await;
    wait_for_sessions(&server_registry, 0).await;
}

#[tokio::test]
async fn test_each_connection_gets_its_own_tunnel() {
    let backend = start_echo_backend().await;
    let (remote_url, server_registry) = start_server("echo", &backend).await;
    let (local, client_registry) = start_client(&remote_url).await;

    let mut first = TcpStream::connect(local).await.unwrap();
    let mut second = TcpStream::connect(local).await.unwrap();

    first.write_all(b"first").await.unwrap();
    second.write_all(b"second").await.unwrap();

    let mut buf = [0u8; 6];
    second.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"second");
    let mut buf = [0u8; 5];
    first.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"first");

    wait_for_sessions(&client_registry, 2).await;
    wait_for_sessions(&server_registry, 2).await;
}

#[tokio::test]
async fn test_unknown_mapping_closes_local_connection() {
    let backend = start_echo_backend().await;
    let (remote_url, _server_registry) = start_server("echo", &backend).await;
    let wrong_url = remote_url.replace("/traffic/echo", "/traffic/other");
    let (local, client_registry) = start_client(&wrong_url).await;

    let mut socket = TcpStream::connect(local).await.unwrap();
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
        .await
        .expect("local connection should be closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(client_registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_session_prefix_groups_client_sessions() {
    let backend = start_echo_backend().await;
    let (remote_url, _server_registry) = start_server("echo", &backend).await;

    let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
    let config = ClientConfig::builder().remote_url(&remote_url).build().unwrap();
    let client = TunnelClient::bind(config, registry.clone())
        .await
        .unwrap()
        .with_session_prefix("pool-a/");
    let local = client.local_addr().unwrap();
    tokio::spawn(client.run());

    let mut socket = TcpStream::connect(local).await.unwrap();
    socket.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    socket.read_exact(&mut buf).await.unwrap();

    let sessions = registry.list().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].id.starts_with("pool-a/"));

    let closed = registry.force_close_by_prefix("pool-a/").await.unwrap();
    assert_eq!(closed.len(), 1);
    let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
        .await
        .expect("local connection should be closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}
