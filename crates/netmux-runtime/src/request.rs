//! Messages exchanged between client handles and the stack task

use netmux_core::{
    ClientEvent, ClientId, ConnectionId, DispatchStats, DnsAnswer, NetResult, Protocol, SlotInfo,
};
use std::net::{IpAddr, SocketAddr};
use tokio::sync::oneshot;

/// Command a client asks the stack task to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Open { protocol: Protocol },
    Close { id: ConnectionId },
    Abort { id: ConnectionId },
    Listen { id: ConnectionId, local: SocketAddr },
    Connect { id: ConnectionId, remote: SocketAddr },
    Send { id: ConnectionId, data: Vec<u8> },
    SendTo { id: ConnectionId, data: Vec<u8>, remote: SocketAddr },
    Recv { id: ConnectionId, max_len: usize },
    RecvFrom { id: ConnectionId, max_len: usize },
    GetEvent,
    Renotify,
    JoinGroup { group: IpAddr },
    LeaveGroup { group: IpAddr },
    ResolveHost { name: String, dns_server: IpAddr },
    DnsAnswer,
    SetClientData { id: ConnectionId, data: u64 },
    ClientData { id: ConnectionId },
    LocalEndpoint { id: ConnectionId },
    RemoteEndpoint { id: ConnectionId },
    ConnectionInfo { id: ConnectionId },
}

impl Operation {
    /// Short label for logging
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Open { .. } => "open",
            Operation::Close { .. } => "close",
            Operation::Abort { .. } => "abort",
            Operation::Listen { .. } => "listen",
            Operation::Connect { .. } => "connect",
            Operation::Send { .. } => "send",
            Operation::SendTo { .. } => "send_to",
            Operation::Recv { .. } => "recv",
            Operation::RecvFrom { .. } => "recv_from",
            Operation::GetEvent => "get_event",
            Operation::Renotify => "renotify",
            Operation::JoinGroup { .. } => "join_group",
            Operation::LeaveGroup { .. } => "leave_group",
            Operation::ResolveHost { .. } => "resolve_host",
            Operation::DnsAnswer => "dns_answer",
            Operation::SetClientData { .. } => "set_client_data",
            Operation::ClientData { .. } => "client_data",
            Operation::LocalEndpoint { .. } => "local_endpoint",
            Operation::RemoteEndpoint { .. } => "remote_endpoint",
            Operation::ConnectionInfo { .. } => "connection_info",
        }
    }
}

/// Successful outcome of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Connection(ConnectionId),
    Sent(usize),
    Data(Vec<u8>),
    Datagram(Vec<u8>, SocketAddr),
    Event(ClientEvent),
    Dns(Option<DnsAnswer>),
    ClientData(u64),
    Endpoint(SocketAddr),
    Peer(Option<SocketAddr>),
    Info(SlotInfo),
}

/// Statistics snapshot of a running stack task
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeStats {
    pub dispatch: DispatchStats,
    pub requests_handled: u64,
    pub active_connections: usize,
    pub capacity: usize,
}

/// Everything the stack task accepts on its request channel
#[derive(Debug)]
pub enum StackRequest {
    /// A client operation with its reply slot
    Client {
        client: ClientId,
        op: Operation,
        reply: oneshot::Sender<NetResult<Reply>>,
    },
    /// Snapshot of task statistics
    Stats { reply: oneshot::Sender<RuntimeStats> },
    /// Stop the task after the current message
    Shutdown,
}
