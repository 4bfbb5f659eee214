//! Contract with the external protocol engine
//!
//! The engine owns packet processing, retransmission and timers. The
//! multiplexer only drives it through [`NetworkStack`] commands and reacts to
//! the [`StackEvent`] callbacks it raises. Per-connection engine objects are
//! opaque handles that the registry owns exclusively while a slot is active.

use crate::errors::StackError;
use crate::types::{ClientId, ConnectionId};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::net::{IpAddr, SocketAddr};

// ----------------------------------------------------------------------------
// Command Contract
// ----------------------------------------------------------------------------

/// Commands the multiplexer issues to the protocol engine
///
/// Consuming methods (`tcp_listen`, `tcp_close`, `tcp_abort`, `udp_remove`)
/// take the handle by value: after them the engine owns the object again and
/// raises no further callbacks for it.
pub trait NetworkStack {
    /// Engine-side TCP connection object
    type TcpPcb: fmt::Debug;
    /// Engine-side UDP endpoint object
    type UdpPcb: fmt::Debug;

    fn tcp_new(&mut self) -> Result<Self::TcpPcb, StackError>;

    /// Route callbacks for `pcb` to connection `id`
    fn tcp_set_arg(&mut self, pcb: &mut Self::TcpPcb, id: ConnectionId);

    fn tcp_bind(&mut self, pcb: &mut Self::TcpPcb, local: SocketAddr) -> Result<(), StackError>;

    /// Turn a bound handle into a listener
    ///
    /// On success the engine may replace the handle; on failure the original
    /// is handed back untouched.
    fn tcp_listen(
        &mut self,
        pcb: Self::TcpPcb,
    ) -> Result<Self::TcpPcb, (Self::TcpPcb, StackError)>;

    /// Start an outbound connection; completion arrives as `Connected`
    fn tcp_connect(&mut self, pcb: &mut Self::TcpPcb, remote: SocketAddr)
        -> Result<(), StackError>;

    /// Queue data for transmission and flush; returns the bytes accepted
    fn tcp_write(&mut self, pcb: &mut Self::TcpPcb, data: &[u8]) -> Result<usize, StackError>;

    /// Return receive-window credit for `len` consumed bytes
    fn tcp_recved(&mut self, pcb: &mut Self::TcpPcb, len: usize);

    /// Hand back a delivery the multiplexer could not accept; the engine
    /// delivers it again later
    fn tcp_refuse(&mut self, pcb: &mut Self::TcpPcb, data: Vec<u8>);

    /// Start a graceful close; on failure the handle is given back
    fn tcp_close(&mut self, pcb: Self::TcpPcb) -> Result<(), (Self::TcpPcb, StackError)>;

    fn tcp_abort(&mut self, pcb: Self::TcpPcb);

    /// Local and remote addresses of a TCP handle
    fn tcp_endpoints(&self, pcb: &Self::TcpPcb) -> (SocketAddr, Option<SocketAddr>);

    fn udp_new(&mut self) -> Result<Self::UdpPcb, StackError>;

    /// Route datagrams for `pcb` to connection `id`
    fn udp_set_arg(&mut self, pcb: &mut Self::UdpPcb, id: ConnectionId);

    fn udp_bind(&mut self, pcb: &mut Self::UdpPcb, local: SocketAddr) -> Result<(), StackError>;

    fn udp_connect(&mut self, pcb: &mut Self::UdpPcb, remote: SocketAddr)
        -> Result<(), StackError>;

    fn udp_send(&mut self, pcb: &mut Self::UdpPcb, data: &[u8]) -> Result<(), StackError>;

    fn udp_send_to(
        &mut self,
        pcb: &mut Self::UdpPcb,
        data: &[u8],
        remote: SocketAddr,
    ) -> Result<(), StackError>;

    fn udp_remove(&mut self, pcb: Self::UdpPcb);

    /// Local and connected-peer addresses of a UDP handle
    fn udp_endpoints(&self, pcb: &Self::UdpPcb) -> (SocketAddr, Option<SocketAddr>);

    fn join_multicast_group(&mut self, group: IpAddr) -> Result<(), StackError>;

    fn leave_multicast_group(&mut self, group: IpAddr) -> Result<(), StackError>;

    /// Start resolving `name` on behalf of `client`
    ///
    /// `Ok(Some(addr))` means the engine answered from its cache and will not
    /// raise a `DnsFound` callback. `Ok(None)` means the answer follows as a
    /// callback.
    fn resolve_host(
        &mut self,
        name: &str,
        dns_server: IpAddr,
        client: ClientId,
    ) -> Result<Option<IpAddr>, StackError>;

    /// Periodic service hook, run on the stack task's tick
    ///
    /// Engines run their timers here: re-delivering refused data and raising
    /// `Poll` callbacks for open connections.
    fn tick(&mut self) {}

    /// Next callback raised by an in-process engine, if any
    ///
    /// The stack task drains this after every command and on its service tick.
    fn poll_event(&mut self) -> Option<StackEvent<Self::TcpPcb>> {
        None
    }
}

// ----------------------------------------------------------------------------
// Callback Contract
// ----------------------------------------------------------------------------

/// Callbacks raised by the protocol engine
///
/// `T` is the engine's TCP handle type; accepted connections carry a fresh one.
#[derive(Debug)]
pub enum StackEvent<T> {
    /// A listener accepted a new connection, or failed to
    Accepted {
        listener: ConnectionId,
        result: Result<T, StackError>,
    },
    /// An outbound connect completed
    Connected { conn: ConnectionId },
    /// TCP payload arrived
    TcpReceived { conn: ConnectionId, data: Vec<u8> },
    /// The remote side closed the stream
    RemoteClosed { conn: ConnectionId },
    /// `len` bytes were acknowledged
    Sent { conn: ConnectionId, len: usize },
    /// Fatal connection error; the engine already released its handle
    Error { conn: ConnectionId, error: StackError },
    /// Periodic per-connection service callback
    Poll { conn: ConnectionId },
    /// A datagram arrived
    UdpReceived {
        conn: ConnectionId,
        from: SocketAddr,
        data: Vec<u8>,
    },
    /// A name resolution finished
    DnsFound {
        client: ClientId,
        name: String,
        addr: Option<IpAddr>,
    },
}

impl<T> StackEvent<T> {
    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            StackEvent::Accepted { .. } => "accepted",
            StackEvent::Connected { .. } => "connected",
            StackEvent::TcpReceived { .. } => "tcp-recv",
            StackEvent::RemoteClosed { .. } => "remote-closed",
            StackEvent::Sent { .. } => "sent",
            StackEvent::Error { .. } => "error",
            StackEvent::Poll { .. } => "poll",
            StackEvent::UdpReceived { .. } => "udp-recv",
            StackEvent::DnsFound { .. } => "dns-found",
        }
    }
}

/// Handle to the engine-side object of a slot, tagged by protocol
#[derive(Debug)]
pub enum StackHandle<T, U> {
    Tcp(T),
    Udp(U),
}

/// Engine handle type of a given stack
pub type HandleOf<S> = StackHandle<<S as NetworkStack>::TcpPcb, <S as NetworkStack>::UdpPcb>;

/// Callback type of a given stack
pub type EventOf<S> = StackEvent<<S as NetworkStack>::TcpPcb>;
