//! Mock Protocol Engine for Testing
//!
//! Records every command the multiplexer issues and lets tests script
//! failures, partial writes, cached DNS answers and buffered callbacks. It
//! never raises callbacks on its own; tests construct them explicitly.

use netmux_core::{ClientId, ConnectionId, NetworkStack, StackError, StackEvent};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

// ----------------------------------------------------------------------------
// Recorded Commands
// ----------------------------------------------------------------------------

/// Engine handle minted by the mock; TCP and UDP share one numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockPcb(pub u32);

/// Command kinds that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOp {
    TcpNew,
    TcpBind,
    TcpListen,
    TcpConnect,
    TcpWrite,
    TcpClose,
    UdpNew,
    UdpBind,
    UdpConnect,
    UdpSend,
    UdpSendTo,
    JoinGroup,
    LeaveGroup,
    ResolveHost,
}

/// One command as the mock received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    TcpNew(MockPcb),
    TcpSetArg(MockPcb, ConnectionId),
    TcpBind(MockPcb, SocketAddr),
    TcpListen { old: MockPcb, new: MockPcb },
    TcpConnect(MockPcb, SocketAddr),
    TcpWrite(MockPcb, Vec<u8>),
    TcpRecved(MockPcb, usize),
    TcpRefuse(MockPcb, Vec<u8>),
    TcpClose(MockPcb),
    TcpAbort(MockPcb),
    UdpNew(MockPcb),
    UdpSetArg(MockPcb, ConnectionId),
    UdpBind(MockPcb, SocketAddr),
    UdpConnect(MockPcb, SocketAddr),
    UdpSend(MockPcb, Vec<u8>),
    UdpSendTo(MockPcb, Vec<u8>, SocketAddr),
    UdpRemove(MockPcb),
    JoinGroup(IpAddr),
    LeaveGroup(IpAddr),
    ResolveHost {
        name: String,
        server: IpAddr,
        client: ClientId,
    },
}

// ----------------------------------------------------------------------------
// Mock Stack
// ----------------------------------------------------------------------------

/// Scriptable engine that records everything it is asked to do
#[derive(Debug, Default)]
pub struct MockStack {
    next_pcb: u32,
    calls: Vec<StackCall>,
    failures: HashMap<StackOp, StackError>,
    write_limit: Option<usize>,
    dns_cache: HashMap<String, IpAddr>,
    pending: VecDeque<StackEvent<MockPcb>>,
    endpoints: HashMap<MockPcb, (SocketAddr, Option<SocketAddr>)>,
    ticks: usize,
}

impl MockStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `op` fail with `error`
    pub fn fail_next(&mut self, op: StackOp, error: StackError) {
        self.failures.insert(op, error);
    }

    /// Accept at most `limit` bytes per TCP write
    pub fn set_write_limit(&mut self, limit: usize) {
        self.write_limit = Some(limit);
    }

    /// Answer `name` from the cache instead of raising a callback
    pub fn cache_host(&mut self, name: &str, addr: IpAddr) {
        self.dns_cache.insert(name.to_string(), addr);
    }

    /// Mint a handle the way the engine would for an incoming connection
    pub fn mint_pcb(&mut self) -> MockPcb {
        let pcb = MockPcb(self.next_pcb);
        self.next_pcb += 1;
        pcb
    }

    /// Buffer a callback for the next `poll_event`
    pub fn push_event(&mut self, event: StackEvent<MockPcb>) {
        self.pending.push_back(event);
    }

    /// Every command received so far
    pub fn calls(&self) -> &[StackCall] {
        &self.calls
    }

    /// Commands received since the last call, clearing the record
    pub fn take_calls(&mut self) -> Vec<StackCall> {
        std::mem::take(&mut self.calls)
    }

    /// Receive-window credit returned for `pcb`
    pub fn credited(&self, pcb: MockPcb) -> usize {
        self.calls
            .iter()
            .map(|call| match call {
                StackCall::TcpRecved(p, len) if *p == pcb => *len,
                _ => 0,
            })
            .sum()
    }

    /// Deliveries handed back for `pcb`
    pub fn refused(&self, pcb: MockPcb) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StackCall::TcpRefuse(p, data) if *p == pcb => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Connection id the multiplexer routed `pcb`'s callbacks to, if any
    pub fn arg_of(&self, pcb: MockPcb) -> Option<ConnectionId> {
        self.calls.iter().rev().find_map(|call| match call {
            StackCall::TcpSetArg(p, id) | StackCall::UdpSetArg(p, id) if *p == pcb => Some(*id),
            _ => None,
        })
    }

    pub fn was_aborted(&self, pcb: MockPcb) -> bool {
        self.calls.contains(&StackCall::TcpAbort(pcb))
    }

    pub fn was_closed(&self, pcb: MockPcb) -> bool {
        self.calls.contains(&StackCall::TcpClose(pcb))
    }

    pub fn was_removed(&self, pcb: MockPcb) -> bool {
        self.calls.contains(&StackCall::UdpRemove(pcb))
    }

    /// Number of service ticks run
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    fn check(&mut self, op: StackOp) -> Result<(), StackError> {
        match self.failures.remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn set_local(&mut self, pcb: MockPcb, local: SocketAddr) {
        self.endpoints.entry(pcb).or_insert((unspecified(), None)).0 = local;
    }

    fn set_remote(&mut self, pcb: MockPcb, remote: SocketAddr) {
        self.endpoints.entry(pcb).or_insert((unspecified(), None)).1 = Some(remote);
    }

    fn endpoints_of(&self, pcb: MockPcb) -> (SocketAddr, Option<SocketAddr>) {
        self.endpoints
            .get(&pcb)
            .copied()
            .unwrap_or((unspecified(), None))
    }
}

fn unspecified() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

impl NetworkStack for MockStack {
    type TcpPcb = MockPcb;
    type UdpPcb = MockPcb;

    fn tcp_new(&mut self) -> Result<MockPcb, StackError> {
        self.check(StackOp::TcpNew)?;
        let pcb = self.mint_pcb();
        self.calls.push(StackCall::TcpNew(pcb));
        Ok(pcb)
    }

    fn tcp_set_arg(&mut self, pcb: &mut MockPcb, id: ConnectionId) {
        self.calls.push(StackCall::TcpSetArg(*pcb, id));
    }

    fn tcp_bind(&mut self, pcb: &mut MockPcb, local: SocketAddr) -> Result<(), StackError> {
        self.calls.push(StackCall::TcpBind(*pcb, local));
        self.check(StackOp::TcpBind)?;
        self.set_local(*pcb, local);
        Ok(())
    }

    fn tcp_listen(&mut self, pcb: MockPcb) -> Result<MockPcb, (MockPcb, StackError)> {
        if let Err(e) = self.check(StackOp::TcpListen) {
            return Err((pcb, e));
        }
        // Listening replaces the handle, like a real engine shrinking the pcb
        let new = self.mint_pcb();
        let endpoints = self.endpoints_of(pcb);
        self.endpoints.insert(new, endpoints);
        self.calls.push(StackCall::TcpListen { old: pcb, new });
        Ok(new)
    }

    fn tcp_connect(&mut self, pcb: &mut MockPcb, remote: SocketAddr) -> Result<(), StackError> {
        self.calls.push(StackCall::TcpConnect(*pcb, remote));
        self.check(StackOp::TcpConnect)?;
        self.set_remote(*pcb, remote);
        Ok(())
    }

    fn tcp_write(&mut self, pcb: &mut MockPcb, data: &[u8]) -> Result<usize, StackError> {
        self.check(StackOp::TcpWrite)?;
        let accepted = self.write_limit.map_or(data.len(), |limit| data.len().min(limit));
        if accepted == 0 {
            return Err(StackError::NoMemory);
        }
        self.calls
            .push(StackCall::TcpWrite(*pcb, data[..accepted].to_vec()));
        Ok(accepted)
    }

    fn tcp_recved(&mut self, pcb: &mut MockPcb, len: usize) {
        self.calls.push(StackCall::TcpRecved(*pcb, len));
    }

    fn tcp_refuse(&mut self, pcb: &mut MockPcb, data: Vec<u8>) {
        self.calls.push(StackCall::TcpRefuse(*pcb, data));
    }

    fn tcp_close(&mut self, pcb: MockPcb) -> Result<(), (MockPcb, StackError)> {
        if let Err(e) = self.check(StackOp::TcpClose) {
            return Err((pcb, e));
        }
        self.calls.push(StackCall::TcpClose(pcb));
        Ok(())
    }

    fn tcp_abort(&mut self, pcb: MockPcb) {
        self.calls.push(StackCall::TcpAbort(pcb));
    }

    fn tcp_endpoints(&self, pcb: &MockPcb) -> (SocketAddr, Option<SocketAddr>) {
        self.endpoints_of(*pcb)
    }

    fn udp_new(&mut self) -> Result<MockPcb, StackError> {
        self.check(StackOp::UdpNew)?;
        let pcb = self.mint_pcb();
        self.calls.push(StackCall::UdpNew(pcb));
        Ok(pcb)
    }

    fn udp_set_arg(&mut self, pcb: &mut MockPcb, id: ConnectionId) {
        self.calls.push(StackCall::UdpSetArg(*pcb, id));
    }

    fn udp_bind(&mut self, pcb: &mut MockPcb, local: SocketAddr) -> Result<(), StackError> {
        self.calls.push(StackCall::UdpBind(*pcb, local));
        self.check(StackOp::UdpBind)?;
        self.set_local(*pcb, local);
        Ok(())
    }

    fn udp_connect(&mut self, pcb: &mut MockPcb, remote: SocketAddr) -> Result<(), StackError> {
        self.calls.push(StackCall::UdpConnect(*pcb, remote));
        self.check(StackOp::UdpConnect)?;
        self.set_remote(*pcb, remote);
        Ok(())
    }

    fn udp_send(&mut self, pcb: &mut MockPcb, data: &[u8]) -> Result<(), StackError> {
        self.check(StackOp::UdpSend)?;
        self.calls.push(StackCall::UdpSend(*pcb, data.to_vec()));
        Ok(())
    }

    fn udp_send_to(
        &mut self,
        pcb: &mut MockPcb,
        data: &[u8],
        remote: SocketAddr,
    ) -> Result<(), StackError> {
        self.check(StackOp::UdpSendTo)?;
        self.calls
            .push(StackCall::UdpSendTo(*pcb, data.to_vec(), remote));
        Ok(())
    }

    fn udp_remove(&mut self, pcb: MockPcb) {
        self.calls.push(StackCall::UdpRemove(pcb));
    }

    fn udp_endpoints(&self, pcb: &MockPcb) -> (SocketAddr, Option<SocketAddr>) {
        self.endpoints_of(*pcb)
    }

    fn join_multicast_group(&mut self, group: IpAddr) -> Result<(), StackError> {
        self.check(StackOp::JoinGroup)?;
        self.calls.push(StackCall::JoinGroup(group));
        Ok(())
    }

    fn leave_multicast_group(&mut self, group: IpAddr) -> Result<(), StackError> {
        self.check(StackOp::LeaveGroup)?;
        self.calls.push(StackCall::LeaveGroup(group));
        Ok(())
    }

    fn resolve_host(
        &mut self,
        name: &str,
        dns_server: IpAddr,
        client: ClientId,
    ) -> Result<Option<IpAddr>, StackError> {
        self.calls.push(StackCall::ResolveHost {
            name: name.to_string(),
            server: dns_server,
            client,
        });
        self.check(StackOp::ResolveHost)?;
        Ok(self.dns_cache.get(name).copied())
    }

    fn tick(&mut self) {
        self.ticks += 1;
    }

    fn poll_event(&mut self) -> Option<StackEvent<MockPcb>> {
        self.pending.pop_front()
    }
}
