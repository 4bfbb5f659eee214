//! In-Memory Loopback Engine
//!
//! A tiny protocol engine in which every socket lives on one host. TCP
//! connects pair a client handle with a freshly accepted one on the matching
//! listener, writes show up as receive callbacks on the peer, and UDP sends
//! are delivered to whichever socket is bound to the destination port
//! (including multicast groups the host joined). Receive windows, refused
//! deliveries and per-connection poll callbacks behave the way an embedded
//! engine's do, so flow-control paths can be exercised end to end.

use netmux_core::{ClientId, ConnectionId, NetworkStack, StackError, StackEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::{debug, trace};

// ----------------------------------------------------------------------------
// Loopback Configuration
// ----------------------------------------------------------------------------

/// Configuration for loopback engine behavior
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Address of the simulated host
    pub host_addr: IpAddr,
    /// Receive window of each TCP connection in bytes
    pub receive_window: usize,
    /// First port handed out to sockets that were never bound
    pub ephemeral_port_base: u16,
    /// Raise a `Poll` callback for every open connection on each tick
    pub poll_connections: bool,
    /// Names the resolver knows
    pub hosts: HashMap<String, IpAddr>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            host_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            receive_window: 4096,
            ephemeral_port_base: 49152,
            poll_connections: true,
            hosts: HashMap::new(),
        }
    }
}

impl LoopbackConfig {
    /// Small window so flow control kicks in quickly
    pub fn constrained() -> Self {
        Self {
            receive_window: 64,
            ..Self::default()
        }
    }

    /// Add a resolvable name
    pub fn with_host(mut self, name: &str, addr: IpAddr) -> Self {
        self.hosts.insert(name.to_string(), addr);
        self
    }
}

// ----------------------------------------------------------------------------
// Engine State
// ----------------------------------------------------------------------------

/// Handle to a loopback socket
///
/// Deliberately not `Clone`: the registry owns it exclusively.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct LoopPcb(u32);

impl LoopPcb {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
struct TcpSock {
    arg: Option<ConnectionId>,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    peer: Option<u32>,
    listening: bool,
    /// Bytes this socket may still receive before the reader returns credit
    window: usize,
    refused: VecDeque<Vec<u8>>,
}

#[derive(Debug, Default)]
struct UdpSock {
    arg: Option<ConnectionId>,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

/// Callbacks waiting for delivery, addressed by socket number
///
/// The connection id is looked up when the callback is delivered, so a
/// socket that is released in the meantime silently drops its callbacks.
#[derive(Debug)]
enum Pending {
    Accepted { listener: u32, new: u32 },
    Connected(u32),
    Data(u32, Vec<u8>),
    Closed(u32),
    Sent(u32, usize),
    Failed(u32, StackError),
    Poll(u32),
    Datagram { to: u32, from: SocketAddr, data: Vec<u8> },
    Dns { client: ClientId, name: String, addr: Option<IpAddr> },
}

// ----------------------------------------------------------------------------
// Loopback Stack
// ----------------------------------------------------------------------------

/// Single-host engine connecting local sockets to each other
#[derive(Debug)]
pub struct LoopbackStack {
    config: LoopbackConfig,
    next_sock: u32,
    next_port: u16,
    tcp: HashMap<u32, TcpSock>,
    udp: HashMap<u32, UdpSock>,
    groups: HashSet<IpAddr>,
    dns_cache: HashSet<String>,
    pending: VecDeque<Pending>,
}

impl Default for LoopbackStack {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

impl LoopbackStack {
    pub fn new(config: LoopbackConfig) -> Self {
        let next_port = config.ephemeral_port_base;
        Self {
            config,
            next_sock: 0,
            next_port,
            tcp: HashMap::new(),
            udp: HashMap::new(),
            groups: HashSet::new(),
            dns_cache: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn host_addr(&self) -> IpAddr {
        self.config.host_addr
    }

    /// Number of live TCP and UDP sockets
    pub fn open_sockets(&self) -> usize {
        self.tcp.len() + self.udp.len()
    }

    pub fn joined_groups(&self) -> usize {
        self.groups.len()
    }

    fn mint(&mut self) -> u32 {
        let id = self.next_sock;
        self.next_sock = self.next_sock.wrapping_add(1);
        id
    }

    fn ephemeral(&mut self) -> SocketAddr {
        let port = self.next_port;
        self.next_port = self
            .next_port
            .checked_add(1)
            .unwrap_or(self.config.ephemeral_port_base);
        SocketAddr::new(self.config.host_addr, port)
    }

    fn is_local(&self, ip: IpAddr) -> bool {
        ip == self.config.host_addr || ip.is_loopback() || ip.is_unspecified()
    }

    /// Whether a socket bound to `bound` receives traffic sent to `dest`
    fn accepts(&self, bound: SocketAddr, dest: SocketAddr) -> bool {
        if bound.port() != dest.port() {
            return false;
        }
        if dest.ip().is_multicast() {
            return self.groups.contains(&dest.ip());
        }
        bound.ip().is_unspecified() || bound.ip() == dest.ip() || self.is_local(dest.ip())
    }

    fn tcp_local(&mut self, sock: u32) -> SocketAddr {
        if let Some(local) = self.tcp.get(&sock).and_then(|s| s.local) {
            return local;
        }
        let local = self.ephemeral();
        if let Some(s) = self.tcp.get_mut(&sock) {
            s.local = Some(local);
        }
        local
    }

    fn udp_local(&mut self, sock: u32) -> SocketAddr {
        if let Some(local) = self.udp.get(&sock).and_then(|s| s.local) {
            return local;
        }
        let local = self.ephemeral();
        if let Some(s) = self.udp.get_mut(&sock) {
            s.local = Some(local);
        }
        local
    }

    /// Hand `data` to the peer of `sock`, limited by the peer's window
    fn deliver_stream(&mut self, sock: u32, data: &[u8]) -> Result<usize, StackError> {
        let peer = self
            .tcp
            .get(&sock)
            .and_then(|s| s.peer)
            .ok_or(StackError::Closed)?;
        let receiver = self.tcp.get_mut(&peer).ok_or(StackError::Closed)?;
        let accepted = data.len().min(receiver.window);
        if accepted == 0 {
            return Err(StackError::NoMemory);
        }
        receiver.window -= accepted;
        self.pending
            .push_back(Pending::Data(peer, data[..accepted].to_vec()));
        self.pending.push_back(Pending::Sent(sock, accepted));
        Ok(accepted)
    }

    /// Remove a TCP socket and tell its peer how the connection ended
    fn release_tcp(&mut self, sock: u32, peer_event: impl FnOnce(u32) -> Pending) {
        let Some(released) = self.tcp.remove(&sock) else {
            return;
        };
        if let Some(peer) = released.peer {
            if let Some(p) = self.tcp.get_mut(&peer) {
                p.peer = None;
                self.pending.push_back(peer_event(peer));
            }
        }
        self.pending.retain(|pending| !targets(pending, sock));
    }

    fn resolve(&self, pending: Pending) -> Option<StackEvent<LoopPcb>> {
        let tcp_arg = |sock: u32| self.tcp.get(&sock).and_then(|s| s.arg);
        let event = match pending {
            Pending::Accepted { listener, new } => StackEvent::Accepted {
                listener: tcp_arg(listener)?,
                result: Ok(LoopPcb(new)),
            },
            Pending::Connected(sock) => StackEvent::Connected {
                conn: tcp_arg(sock)?,
            },
            Pending::Data(sock, data) => StackEvent::TcpReceived {
                conn: tcp_arg(sock)?,
                data,
            },
            Pending::Closed(sock) => StackEvent::RemoteClosed {
                conn: tcp_arg(sock)?,
            },
            Pending::Sent(sock, len) => StackEvent::Sent {
                conn: tcp_arg(sock)?,
                len,
            },
            Pending::Failed(sock, error) => StackEvent::Error {
                conn: tcp_arg(sock)?,
                error,
            },
            Pending::Poll(sock) => StackEvent::Poll {
                conn: tcp_arg(sock)?,
            },
            Pending::Datagram { to, from, data } => StackEvent::UdpReceived {
                conn: self.udp.get(&to).and_then(|s| s.arg)?,
                from,
                data,
            },
            Pending::Dns { client, name, addr } => StackEvent::DnsFound { client, name, addr },
        };
        Some(event)
    }
}

fn targets(pending: &Pending, sock: u32) -> bool {
    match pending {
        Pending::Accepted { listener, .. } => *listener == sock,
        Pending::Connected(s)
        | Pending::Data(s, _)
        | Pending::Closed(s)
        | Pending::Sent(s, _)
        | Pending::Failed(s, _)
        | Pending::Poll(s) => *s == sock,
        Pending::Datagram { to, .. } => *to == sock,
        Pending::Dns { .. } => false,
    }
}

impl NetworkStack for LoopbackStack {
    type TcpPcb = LoopPcb;
    type UdpPcb = LoopPcb;

    fn tcp_new(&mut self) -> Result<LoopPcb, StackError> {
        let id = self.mint();
        self.tcp.insert(
            id,
            TcpSock {
                window: self.config.receive_window,
                ..TcpSock::default()
            },
        );
        Ok(LoopPcb(id))
    }

    fn tcp_set_arg(&mut self, pcb: &mut LoopPcb, id: ConnectionId) {
        if let Some(sock) = self.tcp.get_mut(&pcb.0) {
            sock.arg = Some(id);
        }
    }

    fn tcp_bind(&mut self, pcb: &mut LoopPcb, local: SocketAddr) -> Result<(), StackError> {
        let taken = self
            .tcp
            .iter()
            .any(|(id, s)| *id != pcb.0 && s.local.is_some_and(|l| l.port() == local.port()));
        if taken {
            return Err(StackError::InUse);
        }
        let sock = self.tcp.get_mut(&pcb.0).ok_or(StackError::InvalidArgument)?;
        sock.local = Some(local);
        Ok(())
    }

    fn tcp_listen(&mut self, pcb: LoopPcb) -> Result<LoopPcb, (LoopPcb, StackError)> {
        match self.tcp.get_mut(&pcb.0) {
            Some(sock) if sock.local.is_some() => {
                sock.listening = true;
                debug!("Loopback listener on {:?}", sock.local);
                Ok(pcb)
            }
            _ => Err((pcb, StackError::InvalidArgument)),
        }
    }

    fn tcp_connect(&mut self, pcb: &mut LoopPcb, remote: SocketAddr) -> Result<(), StackError> {
        if !self.tcp.contains_key(&pcb.0) {
            return Err(StackError::InvalidArgument);
        }
        if !self.is_local(remote.ip()) {
            // Nobody answers off-host
            self.pending
                .push_back(Pending::Failed(pcb.0, StackError::Timeout));
            return Ok(());
        }

        let listener = self
            .tcp
            .iter()
            .find(|(_, s)| s.listening && s.local.is_some_and(|l| self.accepts(l, remote)))
            .map(|(id, _)| *id);
        let Some(listener) = listener else {
            self.pending
                .push_back(Pending::Failed(pcb.0, StackError::Reset));
            return Ok(());
        };

        let client_local = self.tcp_local(pcb.0);
        let server = self.mint();
        self.tcp.insert(
            server,
            TcpSock {
                local: Some(SocketAddr::new(self.config.host_addr, remote.port())),
                remote: Some(client_local),
                peer: Some(pcb.0),
                window: self.config.receive_window,
                ..TcpSock::default()
            },
        );
        if let Some(client) = self.tcp.get_mut(&pcb.0) {
            client.remote = Some(remote);
            client.peer = Some(server);
        }

        debug!("Loopback connect {} -> {}", client_local, remote);
        self.pending.push_back(Pending::Accepted {
            listener,
            new: server,
        });
        self.pending.push_back(Pending::Connected(pcb.0));
        Ok(())
    }

    fn tcp_write(&mut self, pcb: &mut LoopPcb, data: &[u8]) -> Result<usize, StackError> {
        self.deliver_stream(pcb.0, data)
    }

    fn tcp_recved(&mut self, pcb: &mut LoopPcb, len: usize) {
        if let Some(sock) = self.tcp.get_mut(&pcb.0) {
            sock.window = (sock.window + len).min(self.config.receive_window);
        }
    }

    fn tcp_refuse(&mut self, pcb: &mut LoopPcb, data: Vec<u8>) {
        if let Some(sock) = self.tcp.get_mut(&pcb.0) {
            trace!("Loopback holding {} refused bytes", data.len());
            sock.refused.push_back(data);
        }
    }

    fn tcp_close(&mut self, pcb: LoopPcb) -> Result<(), (LoopPcb, StackError)> {
        self.release_tcp(pcb.0, Pending::Closed);
        Ok(())
    }

    fn tcp_abort(&mut self, pcb: LoopPcb) {
        self.release_tcp(pcb.0, |peer| Pending::Failed(peer, StackError::Reset));
    }

    fn tcp_endpoints(&self, pcb: &LoopPcb) -> (SocketAddr, Option<SocketAddr>) {
        let sock = self.tcp.get(&pcb.0);
        (
            sock.and_then(|s| s.local)
                .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)),
            sock.and_then(|s| s.remote),
        )
    }

    fn udp_new(&mut self) -> Result<LoopPcb, StackError> {
        let id = self.mint();
        self.udp.insert(id, UdpSock::default());
        Ok(LoopPcb(id))
    }

    fn udp_set_arg(&mut self, pcb: &mut LoopPcb, id: ConnectionId) {
        if let Some(sock) = self.udp.get_mut(&pcb.0) {
            sock.arg = Some(id);
        }
    }

    fn udp_bind(&mut self, pcb: &mut LoopPcb, local: SocketAddr) -> Result<(), StackError> {
        let taken = self
            .udp
            .iter()
            .any(|(id, s)| *id != pcb.0 && s.local.is_some_and(|l| l.port() == local.port()));
        if taken {
            return Err(StackError::InUse);
        }
        let sock = self.udp.get_mut(&pcb.0).ok_or(StackError::InvalidArgument)?;
        sock.local = Some(local);
        Ok(())
    }

    fn udp_connect(&mut self, pcb: &mut LoopPcb, remote: SocketAddr) -> Result<(), StackError> {
        if !self.udp.contains_key(&pcb.0) {
            return Err(StackError::InvalidArgument);
        }
        self.udp_local(pcb.0);
        if let Some(sock) = self.udp.get_mut(&pcb.0) {
            sock.peer = Some(remote);
        }
        Ok(())
    }

    fn udp_send(&mut self, pcb: &mut LoopPcb, data: &[u8]) -> Result<(), StackError> {
        let remote = self
            .udp
            .get(&pcb.0)
            .and_then(|s| s.peer)
            .ok_or(StackError::InvalidArgument)?;
        self.udp_send_to(pcb, data, remote)
    }

    fn udp_send_to(
        &mut self,
        pcb: &mut LoopPcb,
        data: &[u8],
        remote: SocketAddr,
    ) -> Result<(), StackError> {
        if !self.udp.contains_key(&pcb.0) {
            return Err(StackError::InvalidArgument);
        }
        if !self.is_local(remote.ip()) && !remote.ip().is_multicast() {
            return Err(StackError::Route);
        }
        let mut from = self.udp_local(pcb.0);
        if from.ip().is_unspecified() {
            from.set_ip(self.config.host_addr);
        }
        let receivers: Vec<u32> = self
            .udp
            .iter()
            .filter(|(id, s)| {
                **id != pcb.0
                    && s.local.is_some_and(|l| self.accepts(l, remote))
                    && s.peer.map_or(true, |p| p == from)
            })
            .map(|(id, _)| *id)
            .collect();

        if receivers.is_empty() {
            trace!("Datagram to {} has no receiver", remote);
        }
        for to in receivers {
            self.pending.push_back(Pending::Datagram {
                to,
                from,
                data: data.to_vec(),
            });
        }
        Ok(())
    }

    fn udp_remove(&mut self, pcb: LoopPcb) {
        self.udp.remove(&pcb.0);
        self.pending.retain(|pending| !targets(pending, pcb.0));
    }

    fn udp_endpoints(&self, pcb: &LoopPcb) -> (SocketAddr, Option<SocketAddr>) {
        let sock = self.udp.get(&pcb.0);
        (
            sock.and_then(|s| s.local)
                .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)),
            sock.and_then(|s| s.peer),
        )
    }

    fn join_multicast_group(&mut self, group: IpAddr) -> Result<(), StackError> {
        if !group.is_multicast() {
            return Err(StackError::InvalidArgument);
        }
        self.groups.insert(group);
        Ok(())
    }

    fn leave_multicast_group(&mut self, group: IpAddr) -> Result<(), StackError> {
        if self.groups.remove(&group) {
            Ok(())
        } else {
            Err(StackError::InvalidArgument)
        }
    }

    fn resolve_host(
        &mut self,
        name: &str,
        _dns_server: IpAddr,
        client: ClientId,
    ) -> Result<Option<IpAddr>, StackError> {
        let addr = self.config.hosts.get(name).copied();
        if addr.is_some() && self.dns_cache.contains(name) {
            return Ok(addr);
        }
        if addr.is_some() {
            self.dns_cache.insert(name.to_string());
        }
        self.pending.push_back(Pending::Dns {
            client,
            name: name.to_string(),
            addr,
        });
        Ok(None)
    }

    fn tick(&mut self) {
        let mut ids: Vec<u32> = self.tcp.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(sock) = self.tcp.get_mut(&id) else {
                continue;
            };
            while let Some(data) = sock.refused.pop_front() {
                self.pending.push_back(Pending::Data(id, data));
            }
            if self.config.poll_connections && sock.peer.is_some() {
                self.pending.push_back(Pending::Poll(id));
            }
        }
    }

    fn poll_event(&mut self) -> Option<StackEvent<LoopPcb>> {
        while let Some(pending) = self.pending.pop_front() {
            if let Some(event) = self.resolve(pending) {
                return Some(event);
            }
        }
        None
    }
}
