//! Client Handles
//!
//! A [`ClientHandle`] is how a client task talks to the stack task. Every
//! call hands an [`Operation`] over the request channel and waits for the
//! reply, so from the client's point of view commands are synchronous.
//! Events arrive through the client's queue; [`ClientHandle::next_event`]
//! sleeps on the client's notifier until one is available.
//!
//! Use one handle per client task. Handles for the same client share one
//! wake-up permit, so two tasks waiting on the same client would steal
//! notifications from each other.

use crate::channels::RequestSender;
use crate::notifier::ClientNotifiers;
use crate::request::{Operation, Reply, StackRequest};
use netmux_core::{
    ClientEvent, ClientId, ConnectionId, DnsAnswer, NetError, NetResult, Protocol, SlotInfo,
};
use std::net::{IpAddr, SocketAddr};
use tokio::sync::oneshot;

/// A client's connection to the stack task
#[derive(Debug, Clone)]
pub struct ClientHandle {
    client: ClientId,
    request_sender: RequestSender,
    notifiers: ClientNotifiers,
}

impl ClientHandle {
    pub(crate) fn new(
        client: ClientId,
        request_sender: RequestSender,
        notifiers: ClientNotifiers,
    ) -> Self {
        Self {
            client,
            request_sender,
            notifiers,
        }
    }

    pub fn id(&self) -> ClientId {
        self.client
    }

    async fn call(&self, op: Operation) -> NetResult<Reply> {
        let (reply, response) = oneshot::channel();
        self.request_sender
            .send(StackRequest::Client {
                client: self.client,
                op,
                reply,
            })
            .await
            .map_err(|_| NetError::Shutdown)?;
        response.await.map_err(|_| NetError::Shutdown)?
    }

    async fn call_done(&self, op: Operation) -> NetResult<()> {
        match self.call(op).await? {
            Reply::Done => Ok(()),
            _ => Err(NetError::Invalid),
        }
    }

    // ------------------------------------------------------------------------
    // Socket Lifecycle
    // ------------------------------------------------------------------------

    pub async fn open(&self, protocol: Protocol) -> NetResult<ConnectionId> {
        match self.call(Operation::Open { protocol }).await? {
            Reply::Connection(id) => Ok(id),
            _ => Err(NetError::Invalid),
        }
    }

    pub async fn close(&self, id: ConnectionId) -> NetResult<()> {
        self.call_done(Operation::Close { id }).await
    }

    pub async fn abort(&self, id: ConnectionId) -> NetResult<()> {
        self.call_done(Operation::Abort { id }).await
    }

    pub async fn listen(&self, id: ConnectionId, local: SocketAddr) -> NetResult<()> {
        self.call_done(Operation::Listen { id, local }).await
    }

    pub async fn connect(&self, id: ConnectionId, remote: SocketAddr) -> NetResult<()> {
        self.call_done(Operation::Connect { id, remote }).await
    }

    // ------------------------------------------------------------------------
    // Data Transfer
    // ------------------------------------------------------------------------

    /// Send on a connected socket; returns the bytes the engine accepted
    pub async fn send(&self, id: ConnectionId, data: &[u8]) -> NetResult<usize> {
        let op = Operation::Send {
            id,
            data: data.to_vec(),
        };
        match self.call(op).await? {
            Reply::Sent(n) => Ok(n),
            _ => Err(NetError::Invalid),
        }
    }

    pub async fn send_to(&self, id: ConnectionId, data: &[u8], remote: SocketAddr) -> NetResult<usize> {
        let op = Operation::SendTo {
            id,
            data: data.to_vec(),
            remote,
        };
        match self.call(op).await? {
            Reply::Sent(n) => Ok(n),
            _ => Err(NetError::Invalid),
        }
    }

    /// Read buffered data; `Again` when nothing has arrived
    pub async fn recv(&self, id: ConnectionId, max_len: usize) -> NetResult<Vec<u8>> {
        match self.call(Operation::Recv { id, max_len }).await? {
            Reply::Data(data) => Ok(data),
            _ => Err(NetError::Invalid),
        }
    }

    pub async fn recv_from(&self, id: ConnectionId, max_len: usize) -> NetResult<(Vec<u8>, SocketAddr)> {
        match self.call(Operation::RecvFrom { id, max_len }).await? {
            Reply::Datagram(data, from) => Ok((data, from)),
            _ => Err(NetError::Invalid),
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Oldest queued event, or the empty sentinel; never waits
    pub async fn get_event(&self) -> NetResult<ClientEvent> {
        match self.call(Operation::GetEvent).await? {
            Reply::Event(event) => Ok(event),
            _ => Err(NetError::Invalid),
        }
    }

    /// Wait for the next event
    pub async fn next_event(&self) -> NetResult<ClientEvent> {
        loop {
            let event = self.get_event().await?;
            if !event.is_none() {
                return Ok(event);
            }
            self.notifiers.notified(self.client).await;
        }
    }

    /// Ask to be woken again if events are still queued
    pub async fn renotify(&self) -> NetResult<()> {
        self.call_done(Operation::Renotify).await
    }

    // ------------------------------------------------------------------------
    // Multicast and Name Resolution
    // ------------------------------------------------------------------------

    pub async fn join_multicast_group(&self, group: IpAddr) -> NetResult<()> {
        self.call_done(Operation::JoinGroup { group }).await
    }

    pub async fn leave_multicast_group(&self, group: IpAddr) -> NetResult<()> {
        self.call_done(Operation::LeaveGroup { group }).await
    }

    /// Start resolving `name`; the outcome arrives as a `DnsResult` event
    pub async fn request_host_by_name(&self, name: &str, dns_server: IpAddr) -> NetResult<()> {
        self.call_done(Operation::ResolveHost {
            name: name.to_string(),
            dns_server,
        })
        .await
    }

    /// Address from the last successful resolution
    pub async fn dns_answer(&self) -> NetResult<Option<DnsAnswer>> {
        match self.call(Operation::DnsAnswer).await? {
            Reply::Dns(answer) => Ok(answer),
            _ => Err(NetError::Invalid),
        }
    }

    // ------------------------------------------------------------------------
    // Connection Attributes
    // ------------------------------------------------------------------------

    pub async fn set_client_data(&self, id: ConnectionId, data: u64) -> NetResult<()> {
        self.call_done(Operation::SetClientData { id, data }).await
    }

    pub async fn client_data(&self, id: ConnectionId) -> NetResult<u64> {
        match self.call(Operation::ClientData { id }).await? {
            Reply::ClientData(data) => Ok(data),
            _ => Err(NetError::Invalid),
        }
    }

    pub async fn local_endpoint(&self, id: ConnectionId) -> NetResult<SocketAddr> {
        match self.call(Operation::LocalEndpoint { id }).await? {
            Reply::Endpoint(addr) => Ok(addr),
            _ => Err(NetError::Invalid),
        }
    }

    pub async fn remote_endpoint(&self, id: ConnectionId) -> NetResult<Option<SocketAddr>> {
        match self.call(Operation::RemoteEndpoint { id }).await? {
            Reply::Peer(addr) => Ok(addr),
            _ => Err(NetError::Invalid),
        }
    }

    pub async fn connection_info(&self, id: ConnectionId) -> NetResult<SlotInfo> {
        match self.call(Operation::ConnectionInfo { id }).await? {
            Reply::Info(info) => Ok(info),
            _ => Err(NetError::Invalid),
        }
    }
}
