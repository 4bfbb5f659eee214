//! Event Dispatch and Command Shim
//!
//! The [`Dispatcher`] is the single owner of the registry, the event queues
//! and the protocol engine. Engine callbacks come in through
//! [`Dispatcher::handle_stack_event`] and turn into registry updates plus
//! queued client events; client commands come in through the methods in the
//! "Commands" section. Both run on the stack task only.

use crate::config::NetmuxConfig;
use crate::errors::{NetError, NetResult, StackError};
use crate::event::{ClientEvent, EventKind};
use crate::queue::{EventQueues, Notifier};
use crate::registry::{ConnectionRegistry, SlotInfo};
use crate::stack::{EventOf, HandleOf, NetworkStack, StackEvent, StackHandle};
use crate::types::{ClientId, ConnectionId, ConnectionState, Protocol};
use alloc::string::String;
use alloc::vec::Vec;
use core::net::{IpAddr, SocketAddr};

#[cfg(not(feature = "std"))]
use log::{debug, error, warn};
#[cfg(feature = "std")]
use tracing::{debug, error, warn};

// ----------------------------------------------------------------------------
// Dispatch Results
// ----------------------------------------------------------------------------

/// What the dispatcher did with an engine callback
///
/// Any compensating engine command (abort, refuse) has already been issued
/// when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Handled normally
    Ok,
    /// TCP data handed back to the engine for re-delivery
    Refused,
    /// Datagram discarded because the client could not be told about it
    Dropped,
    /// New connection aborted
    Aborted,
    /// Callback did not match any live connection or client
    Ignored,
}

/// Resolved address kept for the client that asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub name: String,
    pub addr: IpAddr,
}

/// Counters kept by the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DispatchStats {
    pub stack_events: u64,
    pub events_queued: u64,
    pub events_dropped: u64,
    pub segments_refused: u64,
    pub datagrams_dropped: u64,
    pub accepts_aborted: u64,
    pub callbacks_ignored: u64,
    pub sent_notifications_recovered: u64,
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Owner of all multiplexer state on the stack task
pub struct Dispatcher<S: NetworkStack, N: Notifier> {
    registry: ConnectionRegistry<S>,
    queues: EventQueues<N>,
    stack: S,
    dns_answers: Vec<Option<DnsAnswer>>,
    stats: DispatchStats,
}

impl<S: NetworkStack, N: Notifier> Dispatcher<S, N> {
    /// Create a dispatcher around `stack`
    ///
    /// The configuration is validated first; capacities cannot change later.
    pub fn new(config: &NetmuxConfig, stack: S, notifier: N) -> NetResult<Self> {
        config.validate()?;
        let mut dns_answers = Vec::with_capacity(config.queue.max_clients);
        dns_answers.resize_with(config.queue.max_clients, || None);
        Ok(Self {
            registry: ConnectionRegistry::new(&config.registry),
            queues: EventQueues::new(&config.queue, notifier),
            stack,
            dns_answers,
            stats: DispatchStats::default(),
        })
    }

    pub fn registry(&self) -> &ConnectionRegistry<S> {
        &self.registry
    }

    pub fn queues(&self) -> &EventQueues<N> {
        &self.queues
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Run the engine's timers, then dispatch whatever they raised
    pub fn service(&mut self) -> usize {
        self.stack.tick();
        self.drain_stack_events()
    }

    /// Feed every callback the engine has buffered through the dispatcher
    pub fn drain_stack_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.stack.poll_event() {
            self.handle_stack_event(event);
            handled += 1;
        }
        handled
    }

    // ------------------------------------------------------------------------
    // Engine Callbacks
    // ------------------------------------------------------------------------

    /// Apply one engine callback
    pub fn handle_stack_event(&mut self, event: EventOf<S>) -> Verdict {
        self.stats.stack_events += 1;
        debug!("Stack callback: {}", event.label());

        let verdict = match event {
            StackEvent::Accepted { listener, result } => match result {
                Ok(pcb) => self.on_accepted(listener, pcb),
                Err(e) => {
                    warn!("Listener {} failed to accept: {}", listener, e);
                    Verdict::Ignored
                }
            },
            StackEvent::Connected { conn } => self.on_connected(conn),
            StackEvent::TcpReceived { conn, data } => self.on_tcp_received(conn, data),
            StackEvent::RemoteClosed { conn } => self.on_simple_event(conn, EventKind::Closed),
            StackEvent::Sent { conn, len } => self.on_sent(conn, len),
            StackEvent::Error { conn, error } => self.on_error(conn, error),
            StackEvent::Poll { conn } => self.on_poll(conn),
            StackEvent::UdpReceived { conn, from, data } => self.on_udp_received(conn, from, data),
            StackEvent::DnsFound { client, name, addr } => self.on_dns_found(client, name, addr),
        };

        if verdict == Verdict::Ignored {
            self.stats.callbacks_ignored += 1;
        }
        verdict
    }

    fn on_accepted(&mut self, listener: ConnectionId, pcb: S::TcpPcb) -> Verdict {
        let owner = match (self.registry.owner(listener), self.registry.protocol(listener)) {
            (Ok(owner), Ok(Protocol::Tcp))
                if self.registry.state(listener) == Ok(ConnectionState::Listening) =>
            {
                owner
            }
            (Ok(_), Ok(Protocol::Tcp)) => {
                warn!("Accept on {} which is not listening", listener);
                return self.abort_accepted(pcb);
            }
            (Ok(_), Ok(Protocol::Udp)) => {
                warn!("Accept on UDP socket {}: {}", listener, NetError::ProtocolNotSupported);
                return self.abort_accepted(pcb);
            }
            _ => {
                warn!("Accept for unknown listener {}", listener);
                return self.abort_accepted(pcb);
            }
        };

        let id = match self.registry.assign(owner, Protocol::Tcp) {
            Ok(id) => id,
            Err(e) => {
                warn!("No slot for connection accepted on {}: {}", listener, e);
                return self.abort_accepted(pcb);
            }
        };

        let mut pcb = pcb;
        self.stack.tcp_set_arg(&mut pcb, id);
        if let Err(pcb) = self.registry.set_tcp_handle(id, pcb) {
            let _ = self.registry.free(id);
            return self.abort_accepted(pcb);
        }
        let _ = self.registry.set_state(id, ConnectionState::Connected);

        if self.notify(owner, id, EventKind::Accepted).is_err() {
            if let Ok(Some(StackHandle::Tcp(pcb))) = self.registry.free(id) {
                return self.abort_accepted(pcb);
            }
            self.stats.accepts_aborted += 1;
            return Verdict::Aborted;
        }
        Verdict::Ok
    }

    fn abort_accepted(&mut self, pcb: S::TcpPcb) -> Verdict {
        self.stack.tcp_abort(pcb);
        self.stats.accepts_aborted += 1;
        Verdict::Aborted
    }

    fn on_connected(&mut self, conn: ConnectionId) -> Verdict {
        let Ok(owner) = self.registry.owner(conn) else {
            warn!("Connect completion for unknown {}", conn);
            return Verdict::Ignored;
        };
        // Only an outstanding TCP connect can complete
        if self.registry.protocol(conn) != Ok(Protocol::Tcp)
            || self.registry.state(conn) != Ok(ConnectionState::ConnectPending)
        {
            warn!("Connect completion for {} with no connect pending", conn);
            return Verdict::Ignored;
        }
        let _ = self.registry.set_state(conn, ConnectionState::Connected);
        let _ = self.notify(owner, conn, EventKind::NewConnection);
        Verdict::Ok
    }

    fn on_simple_event(&mut self, conn: ConnectionId, kind: EventKind) -> Verdict {
        let Ok(owner) = self.registry.owner(conn) else {
            warn!("{:?} for unknown {}", kind, conn);
            return Verdict::Ignored;
        };
        let _ = self.notify(owner, conn, kind);
        Verdict::Ok
    }

    fn on_tcp_received(&mut self, conn: ConnectionId, data: Vec<u8>) -> Verdict {
        let owner = match (self.registry.owner(conn), self.registry.protocol(conn)) {
            (Ok(owner), Ok(Protocol::Tcp)) => owner,
            _ => {
                warn!("TCP data for unknown {} ({} bytes dropped)", conn, data.len());
                return Verdict::Ignored;
            }
        };

        // A stream delivery without payload marks the end of the stream
        if data.is_empty() {
            debug!("{} received end of stream", conn);
            let _ = self.notify(owner, conn, EventKind::Closed);
            return Verdict::Ok;
        }

        let segment = match self.registry.append_received(conn, None, data) {
            Ok(segment) => segment,
            Err(_) => return Verdict::Ignored,
        };

        if self.notify(owner, conn, EventKind::RecvData).is_ok() {
            return Verdict::Ok;
        }

        // The client cannot learn about the data: give it back to the engine
        let Ok(unlinked) = self.registry.unlink(conn, segment) else {
            return Verdict::Ignored;
        };
        if let Ok(pcb) = self.registry.tcp_handle_mut(conn) {
            self.stack.tcp_refuse(pcb, unlinked.payload);
        }
        self.stats.segments_refused += 1;
        Verdict::Refused
    }

    fn on_sent(&mut self, conn: ConnectionId, len: usize) -> Verdict {
        let Ok(owner) = self.registry.owner(conn) else {
            warn!("Send acknowledgement for unknown {}", conn);
            return Verdict::Ignored;
        };
        debug!("{} acknowledged {} bytes", conn, len);
        // A delivered notice covers any earlier one that was dropped
        let delivered = self.notify(owner, conn, EventKind::SentData).is_ok();
        let _ = self.registry.set_sent_notify_pending(conn, !delivered);
        Verdict::Ok
    }

    fn on_poll(&mut self, conn: ConnectionId) -> Verdict {
        let Ok(owner) = self.registry.owner(conn) else {
            return Verdict::Ignored;
        };
        if self.registry.sent_notify_pending(conn) == Ok(true)
            && self.notify(owner, conn, EventKind::SentData).is_ok()
        {
            let _ = self.registry.set_sent_notify_pending(conn, false);
            self.stats.sent_notifications_recovered += 1;
        }
        Verdict::Ok
    }

    fn on_error(&mut self, conn: ConnectionId, error: StackError) -> Verdict {
        let Ok(owner) = self.registry.owner(conn) else {
            warn!("Stack error {} for unknown {}", error, conn);
            return Verdict::Ignored;
        };
        let kind = match error {
            StackError::Aborted => EventKind::Aborted,
            _ => EventKind::TimedOut,
        };
        debug!("{} failed with {}, reporting {:?}", conn, error, kind);

        // The engine has already released its object; only our view remains.
        // The slot is freed below and its id may be reused at once, so older
        // events naming it must not outlive it.
        self.queues.purge_connection(owner, conn);
        let _ = self.registry.drop_pending(conn);
        let _ = self.registry.take_handle(conn);
        let _ = self.notify(owner, conn, kind);
        let _ = self.registry.free(conn);
        Verdict::Ok
    }

    fn on_udp_received(&mut self, conn: ConnectionId, from: SocketAddr, data: Vec<u8>) -> Verdict {
        let owner = match (self.registry.owner(conn), self.registry.protocol(conn)) {
            (Ok(owner), Ok(Protocol::Udp)) => owner,
            _ => {
                warn!("Datagram for unknown {} from {}", conn, from);
                return Verdict::Ignored;
            }
        };
        let kind = match self.registry.udp_peer(conn) {
            Ok(Some(_)) => EventKind::RecvData,
            _ => EventKind::RecvFromData,
        };

        let segment = match self.registry.append_received(conn, Some(from), data) {
            Ok(segment) => segment,
            Err(_) => return Verdict::Ignored,
        };
        if self.notify(owner, conn, kind).is_ok() {
            return Verdict::Ok;
        }

        let _ = self.registry.unlink(conn, segment);
        self.stats.datagrams_dropped += 1;
        Verdict::Dropped
    }

    fn on_dns_found(&mut self, client: ClientId, name: String, addr: Option<IpAddr>) -> Verdict {
        let Some(answer) = self.dns_answers.get_mut(client.index()) else {
            warn!("DNS answer for unknown {}", client);
            return Verdict::Ignored;
        };
        let status = match addr {
            Some(addr) => {
                debug!("Resolved {} to {} for {}", name, addr, client);
                *answer = Some(DnsAnswer { name, addr });
                Ok(())
            }
            None => {
                debug!("Could not resolve {} for {}", name, client);
                *answer = None;
                Err(NetError::NoMemory)
            }
        };
        let _ = self.notify_event(client, ClientEvent::dns_result(&status));
        Verdict::Ok
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Create a socket owned by `client`
    pub fn open(&mut self, client: ClientId, protocol: Protocol) -> NetResult<ConnectionId> {
        if !self.queues.is_valid_client(client) {
            return Err(NetError::Invalid);
        }
        let id = self.registry.assign(client, protocol)?;

        let attached = match protocol {
            Protocol::Tcp => match self.stack.tcp_new() {
                Ok(mut pcb) => {
                    self.stack.tcp_set_arg(&mut pcb, id);
                    self.registry.set_tcp_handle(id, pcb).map_err(|pcb| {
                        self.stack.tcp_abort(pcb);
                        NetError::Invalid
                    })
                }
                Err(e) => Err(NetError::from(e)),
            },
            Protocol::Udp => match self.stack.udp_new() {
                Ok(mut pcb) => {
                    self.stack.udp_set_arg(&mut pcb, id);
                    self.registry.set_udp_handle(id, pcb).map_err(|pcb| {
                        self.stack.udp_remove(pcb);
                        NetError::Invalid
                    })
                }
                Err(e) => Err(NetError::from(e)),
            },
        };

        if let Err(e) = attached {
            warn!("Could not create {} socket for {}: {}", protocol, client, e);
            let _ = self.registry.free(id);
            return Err(e);
        }
        debug!("{} opened {} socket {}", client, protocol, id);
        Ok(id)
    }

    /// Gracefully close a socket, discarding unread data and queued events
    pub fn close(&mut self, client: ClientId, id: ConnectionId) -> NetResult<()> {
        let handle = self.release(client, id)?;
        match handle {
            Some(StackHandle::Tcp(pcb)) => {
                if let Err((pcb, e)) = self.stack.tcp_close(pcb) {
                    error!("Graceful close of {} failed ({}), aborting", id, e);
                    self.stack.tcp_abort(pcb);
                }
            }
            Some(StackHandle::Udp(pcb)) => self.stack.udp_remove(pcb),
            None => {}
        }
        debug!("{} closed {}", client, id);
        Ok(())
    }

    /// Tear a socket down immediately, discarding unread data and queued events
    pub fn abort(&mut self, client: ClientId, id: ConnectionId) -> NetResult<()> {
        let handle = self.release(client, id)?;
        match handle {
            Some(StackHandle::Tcp(pcb)) => self.stack.tcp_abort(pcb),
            Some(StackHandle::Udp(pcb)) => self.stack.udp_remove(pcb),
            None => {}
        }
        debug!("{} aborted {}", client, id);
        Ok(())
    }

    fn release(&mut self, client: ClientId, id: ConnectionId) -> NetResult<Option<HandleOf<S>>> {
        self.registry.find(client, id)?;
        self.queues.purge_connection(client, id);
        self.registry.clear_pending(id, &mut self.stack)?;
        self.registry.free(id)
    }

    /// Bind a socket to `local`; TCP sockets also start listening
    pub fn listen(&mut self, client: ClientId, id: ConnectionId, local: SocketAddr) -> NetResult<()> {
        self.registry.find(client, id)?;
        match self.registry.protocol(id)? {
            Protocol::Tcp => {
                if self.registry.state(id)? != ConnectionState::Null {
                    return Err(NetError::Invalid);
                }
                let pcb = self.registry.tcp_handle_mut(id)?;
                self.stack.tcp_bind(pcb, local).map_err(bind_error)?;

                let Some(StackHandle::Tcp(pcb)) = self.registry.take_handle(id)? else {
                    return Err(NetError::Invalid);
                };
                let (mut pcb, result) = match self.stack.tcp_listen(pcb) {
                    Ok(listener) => (listener, Ok(())),
                    Err((pcb, e)) => (pcb, Err(bind_error(e))),
                };
                if result.is_ok() {
                    self.stack.tcp_set_arg(&mut pcb, id);
                }
                if let Err(pcb) = self.registry.set_tcp_handle(id, pcb) {
                    self.stack.tcp_abort(pcb);
                    return Err(NetError::Invalid);
                }
                result?;
                self.registry.set_state(id, ConnectionState::Listening)?;
            }
            Protocol::Udp => {
                let pcb = self.registry.udp_handle_mut(id)?;
                self.stack.udp_bind(pcb, local).map_err(bind_error)?;
                self.stack.udp_set_arg(pcb, id);
            }
        }
        debug!("{} listening on {}", id, local);
        Ok(())
    }

    /// Connect a socket to `remote`
    ///
    /// TCP completes asynchronously with a `NewConnection` event. UDP only
    /// records the peer and completes immediately.
    pub fn connect(&mut self, client: ClientId, id: ConnectionId, remote: SocketAddr) -> NetResult<()> {
        self.registry.find(client, id)?;
        match self.registry.protocol(id)? {
            Protocol::Tcp => {
                if self.registry.state(id)? != ConnectionState::Null {
                    return Err(NetError::Invalid);
                }
                let pcb = self.registry.tcp_handle_mut(id)?;
                self.stack.tcp_connect(pcb, remote)?;
                self.registry.set_state(id, ConnectionState::ConnectPending)?;
            }
            Protocol::Udp => {
                let pcb = self.registry.udp_handle_mut(id)?;
                self.stack.udp_connect(pcb, remote)?;
                self.stack.udp_set_arg(pcb, id);
                self.registry.set_udp_peer(id, Some(remote))?;
            }
        }
        debug!("{} connecting to {}", id, remote);
        Ok(())
    }

    /// Send on a connected socket; returns the bytes the engine accepted
    pub fn send(&mut self, client: ClientId, id: ConnectionId, data: &[u8]) -> NetResult<usize> {
        self.registry.find(client, id)?;
        if data.is_empty() {
            return Ok(0);
        }
        match self.registry.protocol(id)? {
            Protocol::Tcp => {
                if self.registry.state(id)? != ConnectionState::Connected {
                    return Err(NetError::Invalid);
                }
                let pcb = self.registry.tcp_handle_mut(id)?;
                Ok(self.stack.tcp_write(pcb, data)?)
            }
            Protocol::Udp => {
                if self.registry.udp_peer(id)?.is_none() {
                    return Err(NetError::Invalid);
                }
                let pcb = self.registry.udp_handle_mut(id)?;
                self.stack.udp_send(pcb, data)?;
                Ok(data.len())
            }
        }
    }

    /// Send a datagram to an explicit destination
    pub fn send_to(
        &mut self,
        client: ClientId,
        id: ConnectionId,
        data: &[u8],
        remote: SocketAddr,
    ) -> NetResult<usize> {
        self.registry.find(client, id)?;
        if self.registry.protocol(id)? != Protocol::Udp {
            return Err(NetError::ProtocolNotSupported);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let pcb = self.registry.udp_handle_mut(id)?;
        self.stack.udp_send_to(pcb, data, remote)?;
        Ok(data.len())
    }

    /// Read up to `max_len` bytes of the oldest buffered data
    pub fn recv(&mut self, client: ClientId, id: ConnectionId, max_len: usize) -> NetResult<Vec<u8>> {
        self.registry.find(client, id)?;
        let segment = self.registry.consume_head(id, max_len, &mut self.stack)?;
        Ok(segment.payload)
    }

    /// Read the oldest buffered datagram and its sender
    pub fn recv_from(
        &mut self,
        client: ClientId,
        id: ConnectionId,
        max_len: usize,
    ) -> NetResult<(Vec<u8>, SocketAddr)> {
        self.registry.find(client, id)?;
        if self.registry.protocol(id)? != Protocol::Udp {
            return Err(NetError::ProtocolNotSupported);
        }
        let segment = self.registry.consume_head(id, max_len, &mut self.stack)?;
        let remote = segment.remote.ok_or(NetError::Invalid)?;
        Ok((segment.payload, remote))
    }

    pub fn join_multicast_group(&mut self, group: IpAddr) -> NetResult<()> {
        self.stack.join_multicast_group(group)?;
        debug!("Joined multicast group {}", group);
        Ok(())
    }

    pub fn leave_multicast_group(&mut self, group: IpAddr) -> NetResult<()> {
        self.stack.leave_multicast_group(group)?;
        debug!("Left multicast group {}", group);
        Ok(())
    }

    /// Start resolving `name`; the outcome always arrives as a `DnsResult` event
    pub fn request_host_by_name(
        &mut self,
        client: ClientId,
        name: &str,
        dns_server: IpAddr,
    ) -> NetResult<()> {
        if !self.queues.is_valid_client(client) || name.is_empty() {
            return Err(NetError::Invalid);
        }
        match self.stack.resolve_host(name, dns_server, client) {
            Ok(Some(addr)) => {
                // Cached answers still go through the queue
                self.on_dns_found(client, String::from(name), Some(addr));
                Ok(())
            }
            Ok(None) | Err(StackError::InProgress) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Address from the last successful resolution `client` was told about
    pub fn dns_answer(&self, client: ClientId) -> Option<&DnsAnswer> {
        self.dns_answers.get(client.index()).and_then(Option::as_ref)
    }

    /// Take the oldest event for `client`, or the empty sentinel
    pub fn get_event(&mut self, client: ClientId) -> ClientEvent {
        self.queues.dequeue(client)
    }

    pub fn renotify(&self, client: ClientId) {
        self.queues.renotify(client)
    }

    pub fn set_client_data(&mut self, client: ClientId, id: ConnectionId, data: u64) -> NetResult<()> {
        self.registry.find(client, id)?;
        self.registry.set_client_data(id, data)
    }

    pub fn client_data(&self, client: ClientId, id: ConnectionId) -> NetResult<u64> {
        self.registry.find(client, id)?;
        self.registry.client_data(id)
    }

    pub fn local_endpoint(&self, client: ClientId, id: ConnectionId) -> NetResult<SocketAddr> {
        Ok(self.endpoints(client, id)?.0)
    }

    pub fn remote_endpoint(&self, client: ClientId, id: ConnectionId) -> NetResult<Option<SocketAddr>> {
        Ok(self.endpoints(client, id)?.1)
    }

    fn endpoints(
        &self,
        client: ClientId,
        id: ConnectionId,
    ) -> NetResult<(SocketAddr, Option<SocketAddr>)> {
        self.registry.find(client, id)?;
        match self.registry.protocol(id)? {
            Protocol::Tcp => Ok(self.stack.tcp_endpoints(self.registry.tcp_handle(id)?)),
            Protocol::Udp => Ok(self.stack.udp_endpoints(self.registry.udp_handle(id)?)),
        }
    }

    pub fn connection_info(&self, client: ClientId, id: ConnectionId) -> NetResult<SlotInfo> {
        self.registry.find(client, id)?;
        self.registry.info(id)
    }

    // ------------------------------------------------------------------------
    // Internal Helpers
    // ------------------------------------------------------------------------

    fn notify(&mut self, client: ClientId, id: ConnectionId, kind: EventKind) -> NetResult<()> {
        self.notify_event(client, ClientEvent::new(kind, id))
    }

    fn notify_event(&mut self, client: ClientId, event: ClientEvent) -> NetResult<()> {
        let result = self.queues.enqueue_event_and_notify(client, event);
        match result {
            Ok(()) => self.stats.events_queued += 1,
            Err(_) => self.stats.events_dropped += 1,
        }
        result
    }
}

/// Bind and listen failures: a taken address is reported as such, anything
/// else as a bad argument
fn bind_error(err: StackError) -> NetError {
    match err {
        StackError::InUse => NetError::InUse,
        _ => NetError::Invalid,
    }
}
