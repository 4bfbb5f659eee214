//! Stack Task Implementation
//!
//! The stack task is the only writer of the registry and the event queues.
//! It serializes client requests, injected engine callbacks and the periodic
//! service tick onto one tokio task, so no locking is needed anywhere in the
//! multiplexer.

use crate::channels::{RequestReceiver, StackEventReceiver};
use crate::notifier::ClientNotifiers;
use crate::request::{Operation, Reply, RuntimeStats, StackRequest};
use netmux_core::{ClientId, Dispatcher, NetResult, NetworkStack};
use tokio::time::{interval, Duration, MissedTickBehavior};

#[cfg(not(feature = "std"))]
use log::{debug, info, warn};
#[cfg(feature = "std")]
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Stack Task
// ----------------------------------------------------------------------------

/// Owner of the dispatcher and the protocol engine
pub struct StackTask<S: NetworkStack> {
    dispatcher: Dispatcher<S, ClientNotifiers>,
    request_receiver: RequestReceiver,
    stack_event_receiver: StackEventReceiver<S>,
    poll_interval: Duration,
    requests_handled: u64,
    running: bool,
}

impl<S: NetworkStack> StackTask<S> {
    pub fn new(
        dispatcher: Dispatcher<S, ClientNotifiers>,
        request_receiver: RequestReceiver,
        stack_event_receiver: StackEventReceiver<S>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            request_receiver,
            stack_event_receiver,
            poll_interval,
            requests_handled: 0,
            running: true,
        }
    }

    /// Run until shutdown is requested or every client handle is gone
    pub async fn run(mut self) -> NetResult<()> {
        info!("Stack task starting");

        let mut tick = interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut injected_open = true;

        while self.running {
            tokio::select! {
                request = self.request_receiver.recv() => {
                    match request {
                        Some(request) => self.process_request(request),
                        None => {
                            info!("Request channel closed, shutting down");
                            break;
                        }
                    }
                }

                event = self.stack_event_receiver.recv(), if injected_open => {
                    match event {
                        Some(event) => {
                            self.dispatcher.handle_stack_event(event);
                        }
                        None => {
                            debug!("Injected callback channel closed");
                            injected_open = false;
                        }
                    }
                }

                _ = tick.tick() => {
                    self.dispatcher.service();
                }
            }

            // Callbacks the engine raised while handling the message above
            self.dispatcher.drain_stack_events();
        }

        info!(
            "Stack task stopped after {} request(s)",
            self.requests_handled
        );
        Ok(())
    }

    fn process_request(&mut self, request: StackRequest) {
        match request {
            StackRequest::Client { client, op, reply } => {
                self.requests_handled += 1;
                let name = op.name();
                let result = self.execute(client, op);
                if let Err(e) = &result {
                    debug!("{} from {} failed: {}", name, client, e);
                }
                if reply.send(result).is_err() {
                    warn!("{} dropped its reply to {}", client, name);
                }
            }
            StackRequest::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            StackRequest::Shutdown => {
                info!("Shutdown requested");
                self.running = false;
            }
        }
    }

    /// Apply one client operation to the dispatcher
    pub fn execute(&mut self, client: ClientId, op: Operation) -> NetResult<Reply> {
        let d = &mut self.dispatcher;
        let reply = match op {
            Operation::Open { protocol } => Reply::Connection(d.open(client, protocol)?),
            Operation::Close { id } => {
                d.close(client, id)?;
                Reply::Done
            }
            Operation::Abort { id } => {
                d.abort(client, id)?;
                Reply::Done
            }
            Operation::Listen { id, local } => {
                d.listen(client, id, local)?;
                Reply::Done
            }
            Operation::Connect { id, remote } => {
                d.connect(client, id, remote)?;
                Reply::Done
            }
            Operation::Send { id, data } => Reply::Sent(d.send(client, id, &data)?),
            Operation::SendTo { id, data, remote } => {
                Reply::Sent(d.send_to(client, id, &data, remote)?)
            }
            Operation::Recv { id, max_len } => Reply::Data(d.recv(client, id, max_len)?),
            Operation::RecvFrom { id, max_len } => {
                let (data, from) = d.recv_from(client, id, max_len)?;
                Reply::Datagram(data, from)
            }
            Operation::GetEvent => Reply::Event(d.get_event(client)),
            Operation::Renotify => {
                d.renotify(client);
                Reply::Done
            }
            Operation::JoinGroup { group } => {
                d.join_multicast_group(group)?;
                Reply::Done
            }
            Operation::LeaveGroup { group } => {
                d.leave_multicast_group(group)?;
                Reply::Done
            }
            Operation::ResolveHost { name, dns_server } => {
                d.request_host_by_name(client, &name, dns_server)?;
                Reply::Done
            }
            Operation::DnsAnswer => Reply::Dns(d.dns_answer(client).cloned()),
            Operation::SetClientData { id, data } => {
                d.set_client_data(client, id, data)?;
                Reply::Done
            }
            Operation::ClientData { id } => Reply::ClientData(d.client_data(client, id)?),
            Operation::LocalEndpoint { id } => Reply::Endpoint(d.local_endpoint(client, id)?),
            Operation::RemoteEndpoint { id } => Reply::Peer(d.remote_endpoint(client, id)?),
            Operation::ConnectionInfo { id } => Reply::Info(d.connection_info(client, id)?),
        };
        Ok(reply)
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            dispatch: self.dispatcher.stats().clone(),
            requests_handled: self.requests_handled,
            active_connections: self.dispatcher.registry().active_count(),
            capacity: self.dispatcher.registry().capacity(),
        }
    }
}
