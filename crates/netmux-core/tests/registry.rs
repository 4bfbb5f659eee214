//! Connection registry behavior against the recording mock engine

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use netmux_core::{
    ClientId, ConnectionId, ConnectionRegistry, ConnectionState, NetError, Protocol,
    RegistryConfig, StackHandle,
};
use netmux_harness::{MockPcb, MockStack};

const ALICE: ClientId = ClientId::new(0);
const BOB: ClientId = ClientId::new(1);

fn remote(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), port)
}

fn registry(capacity: usize) -> ConnectionRegistry<MockStack> {
    ConnectionRegistry::with_capacity(capacity)
}

#[test]
fn test_capacity_comes_from_socket_pools() {
    let config = RegistryConfig {
        tcp_sockets: 3,
        udp_sockets: 2,
    };
    let registry: ConnectionRegistry<MockStack> = ConnectionRegistry::new(&config);
    assert_eq!(registry.capacity(), 5);
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn test_assign_until_full() {
    let mut registry = registry(3);
    let ids: Vec<_> = (0..3)
        .map(|_| registry.assign(ALICE, Protocol::Tcp).unwrap())
        .collect();

    assert_eq!(ids, vec![ConnectionId::new(0), ConnectionId::new(1), ConnectionId::new(2)]);
    assert_eq!(registry.assign(ALICE, Protocol::Udp), Err(NetError::NoMemory));
    assert_eq!(registry.active_count(), 3);
}

#[test]
fn test_initial_state_depends_on_protocol() {
    let mut registry = registry(2);
    let tcp = registry.assign(ALICE, Protocol::Tcp).unwrap();
    let udp = registry.assign(ALICE, Protocol::Udp).unwrap();

    assert_eq!(registry.state(tcp), Ok(ConnectionState::Null));
    assert_eq!(registry.state(udp), Ok(ConnectionState::Connected));
}

#[test]
fn test_freed_index_is_not_reused_immediately() {
    let mut registry = registry(3);
    let first = registry.assign(ALICE, Protocol::Tcp).unwrap();
    registry.free(first).unwrap();

    let second = registry.assign(ALICE, Protocol::Tcp).unwrap();
    assert_ne!(first, second);

    // Wraps around once the rest of the table is taken
    let third = registry.assign(ALICE, Protocol::Tcp).unwrap();
    let fourth = registry.assign(ALICE, Protocol::Tcp).unwrap();
    assert_eq!(fourth, first);
    assert_ne!(third, fourth);
}

#[test]
fn test_find_checks_owner_and_liveness() {
    let mut registry = registry(4);
    let id = registry.assign(ALICE, Protocol::Udp).unwrap();

    assert_eq!(registry.find(ALICE, id), Ok(id));
    assert_eq!(registry.find(BOB, id), Err(NetError::Invalid));
    assert_eq!(registry.find(ALICE, ConnectionId::new(3)), Err(NetError::Invalid));
    assert_eq!(registry.find(ALICE, ConnectionId::new(99)), Err(NetError::Invalid));
    assert_eq!(registry.find(ALICE, ConnectionId::INVALID), Err(NetError::Invalid));

    registry.free(id).unwrap();
    assert_eq!(registry.find(ALICE, id), Err(NetError::Invalid));
    assert!(matches!(registry.free(id), Err(NetError::Invalid)));
}

#[test]
fn test_free_returns_attached_handle() {
    let mut registry = registry(2);
    let id = registry.assign(ALICE, Protocol::Tcp).unwrap();
    registry.set_tcp_handle(id, MockPcb(7)).unwrap();

    match registry.free(id) {
        Ok(Some(StackHandle::Tcp(pcb))) => assert_eq!(pcb, MockPcb(7)),
        other => panic!("unexpected free result: {:?}", other.map(|h| h.is_some())),
    }
}

#[test]
fn test_handle_must_match_protocol() {
    let mut registry = registry(2);
    let tcp = registry.assign(ALICE, Protocol::Tcp).unwrap();
    let udp = registry.assign(ALICE, Protocol::Udp).unwrap();

    assert_eq!(registry.set_udp_handle(tcp, MockPcb(1)), Err(MockPcb(1)));
    assert_eq!(registry.set_tcp_handle(udp, MockPcb(2)), Err(MockPcb(2)));
    assert_eq!(registry.set_tcp_handle(ConnectionId::new(5), MockPcb(3)), Err(MockPcb(3)));

    registry.set_tcp_handle(tcp, MockPcb(4)).unwrap();
    assert_eq!(registry.tcp_handle(tcp), Ok(&MockPcb(4)));
    assert_eq!(registry.udp_handle(tcp), Err(NetError::Invalid));
}

#[test]
fn test_udp_peer_only_for_udp() {
    let mut registry = registry(2);
    let tcp = registry.assign(ALICE, Protocol::Tcp).unwrap();
    let udp = registry.assign(ALICE, Protocol::Udp).unwrap();

    assert_eq!(registry.set_udp_peer(tcp, Some(remote(53))), Err(NetError::Invalid));
    registry.set_udp_peer(udp, Some(remote(53))).unwrap();
    assert_eq!(registry.udp_peer(udp), Ok(Some(remote(53))));
}

#[test]
fn test_tcp_consume_splits_head_and_credits_window() {
    let mut stack = MockStack::new();
    let mut registry = registry(1);
    let id = registry.assign(ALICE, Protocol::Tcp).unwrap();
    registry.set_tcp_handle(id, MockPcb(9)).unwrap();

    registry.append_received(id, None, b"hello world".to_vec()).unwrap();
    registry.append_received(id, None, b"!".to_vec()).unwrap();

    let first = registry.consume_head(id, 5, &mut stack).unwrap();
    assert_eq!(first.payload, b"hello");
    assert_eq!(registry.peek_head(id), Ok(Some((6, None))));
    assert_eq!(registry.pending_segments(id), Ok(2));

    let rest = registry.consume_head(id, 64, &mut stack).unwrap();
    assert_eq!(rest.payload, b" world");
    let last = registry.consume_head(id, 64, &mut stack).unwrap();
    assert_eq!(last.payload, b"!");

    assert_eq!(stack.credited(MockPcb(9)), 12);
    assert_eq!(registry.consume_head(id, 64, &mut stack), Err(NetError::Again));
}

#[test]
fn test_udp_consume_truncates_whole_datagram() {
    let mut stack = MockStack::new();
    let mut registry = registry(1);
    let id = registry.assign(ALICE, Protocol::Udp).unwrap();
    registry.set_udp_handle(id, MockPcb(2)).unwrap();

    registry
        .append_received(id, Some(remote(4000)), vec![1, 2, 3, 4, 5])
        .unwrap();
    registry
        .append_received(id, Some(remote(4001)), vec![6])
        .unwrap();

    let first = registry.consume_head(id, 3, &mut stack).unwrap();
    assert_eq!(first.payload, vec![1, 2, 3]);
    assert_eq!(first.remote, Some(remote(4000)));

    let second = registry.consume_head(id, 3, &mut stack).unwrap();
    assert_eq!(second.payload, vec![6]);
    assert_eq!(second.remote, Some(remote(4001)));

    assert!(stack.calls().is_empty());
}

#[test]
fn test_consume_rejects_zero_length() {
    let mut stack = MockStack::new();
    let mut registry = registry(1);
    let id = registry.assign(ALICE, Protocol::Tcp).unwrap();
    registry.append_received(id, None, vec![1]).unwrap();

    assert_eq!(registry.consume_head(id, 0, &mut stack), Err(NetError::Invalid));
    assert_eq!(registry.pending_segments(id), Ok(1));
}

#[test]
fn test_unlink_removes_only_named_segment() {
    let mut registry = registry(1);
    let id = registry.assign(ALICE, Protocol::Tcp).unwrap();
    let a = registry.append_received(id, None, b"a".to_vec()).unwrap();
    let b = registry.append_received(id, None, b"bb".to_vec()).unwrap();
    let c = registry.append_received(id, None, b"ccc".to_vec()).unwrap();

    let removed = registry.unlink(id, b).unwrap();
    assert_eq!(removed.payload, b"bb");
    assert_eq!(registry.unlink(id, b), Err(NetError::Invalid));

    let info = registry.info(id).unwrap();
    assert_eq!(info.pending_segments, 2);
    assert_eq!(info.pending_bytes, 4);
    assert_ne!(a, c);
}

#[test]
fn test_clear_pending_credits_tcp_but_drop_does_not() {
    let mut stack = MockStack::new();
    let mut registry = registry(2);
    let cleared = registry.assign(ALICE, Protocol::Tcp).unwrap();
    let dropped = registry.assign(ALICE, Protocol::Tcp).unwrap();
    registry.set_tcp_handle(cleared, MockPcb(1)).unwrap();
    registry.set_tcp_handle(dropped, MockPcb(2)).unwrap();

    for id in [cleared, dropped] {
        registry.append_received(id, None, vec![0; 10]).unwrap();
        registry.append_received(id, None, vec![0; 5]).unwrap();
    }

    assert_eq!(registry.clear_pending(cleared, &mut stack), Ok(15));
    assert_eq!(registry.drop_pending(dropped), Ok(15));

    assert_eq!(stack.credited(MockPcb(1)), 15);
    assert_eq!(stack.credited(MockPcb(2)), 0);
    assert_eq!(registry.pending_segments(cleared), Ok(0));
    assert_eq!(registry.pending_segments(dropped), Ok(0));
}

#[test]
fn test_slot_attributes_reset_on_reuse() {
    let mut registry = registry(1);
    let id = registry.assign(ALICE, Protocol::Tcp).unwrap();
    registry.set_client_data(id, 0xfeed).unwrap();
    registry.set_sent_notify_pending(id, true).unwrap();
    registry.set_state(id, ConnectionState::Connected).unwrap();
    registry.free(id).unwrap();

    let reused = registry.assign(BOB, Protocol::Tcp).unwrap();
    assert_eq!(reused, id);
    assert_eq!(registry.owner(reused), Ok(BOB));
    assert_eq!(registry.client_data(reused), Ok(0));
    assert_eq!(registry.sent_notify_pending(reused), Ok(false));
    assert_eq!(registry.state(reused), Ok(ConnectionState::Null));
}

#[test]
fn test_active_slots_snapshot() {
    let mut registry = registry(3);
    let a = registry.assign(ALICE, Protocol::Tcp).unwrap();
    let b = registry.assign(BOB, Protocol::Udp).unwrap();
    registry.append_received(b, Some(remote(9)), vec![0; 3]).unwrap();

    let slots = registry.active_slots();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].id, a);
    assert_eq!(slots[0].owner, ALICE);
    assert_eq!(slots[1].protocol, Protocol::Udp);
    assert_eq!(slots[1].pending_bytes, 3);
}
