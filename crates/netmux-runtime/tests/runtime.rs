//! Runtime integration tests
//!
//! Drives the stack task through client handles over the loopback engine:
//! connections, datagrams, wake-ups, name resolution and shutdown.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use netmux_harness::{LoopbackConfig, LoopbackStack};
use netmux_runtime::{
    create_test_runtime, ClientHandle, ClientId, ConnectionId, ConnectionState, EventKind,
    NetError, NetmuxConfig, Protocol, Runtime, RuntimeBuilder, StackEvent,
};
use tokio::time::{timeout, Duration};

const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
const DNS_SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 53));

async fn start(config: LoopbackConfig) -> Runtime<LoopbackStack> {
    RuntimeBuilder::new(LoopbackStack::new(config))
        .with_config(NetmuxConfig::testing())
        .queue_capacity(16)
        .build_and_start()
        .await
        .expect("Failed to start runtime")
}

fn any_port(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// Next event of `kind`, skipping anything else
async fn wait_for(client: &ClientHandle, kind: EventKind) -> ConnectionId {
    timeout(Duration::from_secs(2), async {
        loop {
            let event = client.next_event().await.expect("event");
            if event.kind == kind {
                return event.id;
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

#[tokio::test]
async fn test_runtime_starts_and_shuts_down() {
    let mut runtime = start(LoopbackConfig::default()).await;
    assert!(runtime.is_running());

    runtime.shutdown().await.expect("Failed to shutdown");
    assert!(!runtime.is_running());
}

#[tokio::test]
async fn test_tcp_exchange_through_handles() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let server = runtime.client(0).unwrap();
    let peer = runtime.client(1).unwrap();

    let listener = server.open(Protocol::Tcp).await.unwrap();
    server.listen(listener, any_port(80)).await.unwrap();
    let info = server.connection_info(listener).await.unwrap();
    assert_eq!(info.state, ConnectionState::Listening);

    let conn = peer.open(Protocol::Tcp).await.unwrap();
    peer.connect(conn, SocketAddr::new(HOST, 80)).await.unwrap();

    let accepted = wait_for(&server, EventKind::Accepted).await;
    assert_eq!(wait_for(&peer, EventKind::NewConnection).await, conn);
    assert_ne!(accepted, listener);

    assert_eq!(peer.send(conn, b"hello").await.unwrap(), 5);
    assert_eq!(wait_for(&server, EventKind::RecvData).await, accepted);
    let data = server.recv(accepted, 64).await.unwrap();
    assert_eq!(data, b"hello");
    assert_eq!(server.recv(accepted, 64).await, Err(NetError::Again));

    server.send(accepted, &data).await.unwrap();
    wait_for(&peer, EventKind::RecvData).await;
    assert_eq!(peer.recv(conn, 64).await.unwrap(), b"hello");

    peer.close(conn).await.unwrap();
    assert_eq!(wait_for(&server, EventKind::Closed).await, accepted);
    server.close(accepted).await.unwrap();
    server.close(listener).await.unwrap();

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_connection_is_private_to_owner() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let owner = runtime.client(0).unwrap();
    let other = runtime.client(1).unwrap();

    let id = owner.open(Protocol::Udp).await.unwrap();
    assert_eq!(other.close(id).await, Err(NetError::Invalid));
    assert_eq!(other.client_data(id).await, Err(NetError::Invalid));

    owner.set_client_data(id, 42).await.unwrap();
    assert_eq!(owner.client_data(id).await.unwrap(), 42);
    owner.close(id).await.unwrap();

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_udp_datagrams_carry_sender() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let server = runtime.client(0).unwrap();
    let peer = runtime.client(1).unwrap();

    let socket = server.open(Protocol::Udp).await.unwrap();
    server.listen(socket, any_port(5353)).await.unwrap();
    let sender = peer.open(Protocol::Udp).await.unwrap();
    peer.listen(sender, any_port(6000)).await.unwrap();

    peer.send_to(sender, b"ping", SocketAddr::new(HOST, 5353))
        .await
        .unwrap();

    assert_eq!(wait_for(&server, EventKind::RecvFromData).await, socket);
    let (data, from) = server.recv_from(socket, 64).await.unwrap();
    assert_eq!(data, b"ping");
    assert_eq!(from, SocketAddr::new(HOST, 6000));

    // Datagrams are never split across reads
    peer.send_to(sender, b"truncated", SocketAddr::new(HOST, 5353))
        .await
        .unwrap();
    wait_for(&server, EventKind::RecvFromData).await;
    let (data, _) = server.recv_from(socket, 4).await.unwrap();
    assert_eq!(data, b"trun");
    assert_eq!(server.recv_from(socket, 64).await, Err(NetError::Again));

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_waiting_client_is_woken() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let server = runtime.client(0).unwrap();
    let peer = runtime.client(1).unwrap();

    let listener = server.open(Protocol::Tcp).await.unwrap();
    server.listen(listener, any_port(8080)).await.unwrap();

    let waiter = tokio::spawn({
        let server = server.clone();
        async move { server.next_event().await }
    });
    tokio::task::yield_now().await;

    let conn = peer.open(Protocol::Tcp).await.unwrap();
    peer.connect(conn, SocketAddr::new(HOST, 8080)).await.unwrap();

    let event = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("Waiter was never woken")
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, EventKind::Accepted);

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_name_resolution_and_cache() {
    let addr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));
    let mut runtime = start(LoopbackConfig::default().with_host("sensor.local", addr)).await;
    let client = runtime.client(0).unwrap();

    assert_eq!(client.dns_answer().await.unwrap(), None);

    client
        .request_host_by_name("sensor.local", DNS_SERVER)
        .await
        .unwrap();
    let event = timeout(Duration::from_secs(2), client.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.dns_status(), Some(Ok(())));
    assert_eq!(client.dns_answer().await.unwrap().map(|a| a.addr), Some(addr));

    // A cached answer still arrives as an event
    client
        .request_host_by_name("sensor.local", DNS_SERVER)
        .await
        .unwrap();
    let event = timeout(Duration::from_secs(2), client.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, EventKind::DnsResult);
    assert_eq!(event.dns_status(), Some(Ok(())));

    client
        .request_host_by_name("missing.local", DNS_SERVER)
        .await
        .unwrap();
    let event = timeout(Duration::from_secs(2), client.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.dns_status(), Some(Err(NetError::NoMemory)));
    assert_eq!(client.dns_answer().await.unwrap(), None);

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_injected_callback_reaches_client() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let client = runtime.client(1).unwrap();
    let addr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));

    runtime
        .stack_event_sender()
        .send(StackEvent::DnsFound {
            client: ClientId::new(1),
            name: "injected.local".to_string(),
            addr: Some(addr),
        })
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), client.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.dns_status(), Some(Ok(())));
    let answer = client.dns_answer().await.unwrap().unwrap();
    assert_eq!(answer.name, "injected.local");
    assert_eq!(answer.addr, addr);

    // Other clients see nothing
    let other = runtime.client(0).unwrap();
    assert!(other.get_event().await.unwrap().is_none());

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_concurrent_clients_get_distinct_sockets() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let clients: Vec<ClientHandle> = (0..4).map(|i| runtime.client(i).unwrap()).collect();

    let opened = futures::future::join_all(
        clients
            .iter()
            .flat_map(|c| [c.open(Protocol::Tcp), c.open(Protocol::Udp)]),
    )
    .await;
    let mut ids: Vec<ConnectionId> = opened.into_iter().map(|r| r.unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    // The registry is full now
    assert_eq!(clients[0].open(Protocol::Udp).await, Err(NetError::NoMemory));

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_stats_count_requests() {
    let mut runtime = create_test_runtime(LoopbackStack::new(LoopbackConfig::default()))
        .await
        .expect("Failed to start runtime");
    let client = runtime.client(0).unwrap();

    let before = runtime.stats().await.unwrap();
    let id = client.open(Protocol::Tcp).await.unwrap();
    let during = runtime.stats().await.unwrap();
    client.close(id).await.unwrap();
    let after = runtime.stats().await.unwrap();

    assert_eq!(during.requests_handled, before.requests_handled + 1);
    assert_eq!(during.active_connections, 1);
    assert_eq!(after.active_connections, 0);
    assert_eq!(after.capacity, NetmuxConfig::testing().registry.capacity());

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_client_index_is_bounded() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let max_clients = runtime.config().queue.max_clients;

    assert!(runtime.client((max_clients - 1) as u8).is_ok());
    assert!(matches!(runtime.client(max_clients as u8), Err(NetError::Invalid)));

    runtime.shutdown().await.expect("Failed to shutdown");
}

#[tokio::test]
async fn test_operations_fail_after_shutdown() {
    let mut runtime = start(LoopbackConfig::default()).await;
    let client = runtime.client(0).unwrap();

    runtime.shutdown().await.expect("Failed to shutdown");
    assert!(!runtime.is_running());

    assert_eq!(client.open(Protocol::Tcp).await, Err(NetError::Shutdown));
    assert_eq!(client.get_event().await, Err(NetError::Shutdown));
    assert!(matches!(runtime.stats().await, Err(NetError::Shutdown)));
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let result = RuntimeBuilder::new(LoopbackStack::new(LoopbackConfig::default()))
        .with_config(NetmuxConfig::testing())
        .max_clients(0)
        .build_and_start()
        .await;
    assert!(matches!(result, Err(NetError::Config { .. })));

    let result = RuntimeBuilder::new(LoopbackStack::new(LoopbackConfig::default()))
        .sockets(0, 0)
        .build_and_start()
        .await;
    assert!(matches!(result, Err(NetError::Config { .. })));
}
