//! Runtime Builder API
//!
//! Provides a builder-style API for consumers (CLI, tests, firmware glue) to
//! hand over a protocol engine and get client handles back.

use crate::channels::{
    create_request_channel, create_stack_event_channel, RequestSender, StackEventSender,
};
use crate::client::ClientHandle;
use crate::notifier::ClientNotifiers;
use crate::request::{RuntimeStats, StackRequest};
use crate::task::StackTask;
use netmux_core::{ClientId, Dispatcher, NetError, NetResult, NetmuxConfig, NetworkStack};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[cfg(not(feature = "std"))]
use log::{info, warn};
#[cfg(feature = "std")]
use tracing::{info, warn};

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a stack task around one protocol engine
pub struct RuntimeBuilder<S: NetworkStack> {
    stack: S,
    config: NetmuxConfig,
}

impl<S> RuntimeBuilder<S>
where
    S: NetworkStack + Send + 'static,
    S::TcpPcb: Send + 'static,
    S::UdpPcb: Send + 'static,
{
    /// Create a builder around `stack` with the default configuration
    pub fn new(stack: S) -> Self {
        Self {
            stack,
            config: NetmuxConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: NetmuxConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of client tasks
    pub fn max_clients(mut self, clients: usize) -> Self {
        self.config.queue.max_clients = clients;
        self
    }

    /// Set the per-client event queue depth
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue.queue_capacity = capacity;
        self
    }

    /// Set the TCP and UDP socket pools
    pub fn sockets(mut self, tcp: usize, udp: usize) -> Self {
        self.config.registry.tcp_sockets = tcp;
        self.config.registry.udp_sockets = udp;
        self
    }

    /// Set the service tick period
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.runtime.poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// Build and start the stack task
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build_and_start(self) -> NetResult<Runtime<S>> {
        info!("Building netmux runtime");

        let notifiers = ClientNotifiers::new(self.config.queue.max_clients);
        let dispatcher = Dispatcher::new(&self.config, self.stack, notifiers.clone())?;

        let (request_sender, request_receiver) = create_request_channel(&self.config.runtime);
        let (stack_event_sender, stack_event_receiver) =
            create_stack_event_channel::<S>(&self.config.runtime);

        let task = StackTask::new(
            dispatcher,
            request_receiver,
            stack_event_receiver,
            Duration::from_millis(self.config.runtime.poll_interval_ms),
        );
        let task_handle = tokio::spawn(task.run());

        info!(
            "netmux runtime started ({} sockets, {} clients)",
            self.config.registry.capacity(),
            self.config.queue.max_clients
        );

        Ok(Runtime {
            config: self.config,
            request_sender,
            stack_event_sender,
            notifiers,
            task_handle: Some(task_handle),
            running: true,
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running stack task
pub struct Runtime<S: NetworkStack> {
    config: NetmuxConfig,
    request_sender: RequestSender,
    stack_event_sender: StackEventSender<S>,
    notifiers: ClientNotifiers,
    task_handle: Option<JoinHandle<NetResult<()>>>,
    running: bool,
}

impl<S: NetworkStack> Runtime<S> {
    pub fn config(&self) -> &NetmuxConfig {
        &self.config
    }

    /// Handle for client `index`
    pub fn client(&self, index: u8) -> NetResult<ClientHandle> {
        let client = ClientId::new(index);
        if client.index() >= self.config.queue.max_clients {
            return Err(NetError::Invalid);
        }
        Ok(ClientHandle::new(
            client,
            self.request_sender.clone(),
            self.notifiers.clone(),
        ))
    }

    /// Sender for callbacks raised outside the stack task
    pub fn stack_event_sender(&self) -> StackEventSender<S> {
        self.stack_event_sender.clone()
    }

    /// Statistics snapshot from the stack task
    pub async fn stats(&self) -> NetResult<RuntimeStats> {
        let (reply, response) = oneshot::channel();
        self.request_sender
            .send(StackRequest::Stats { reply })
            .await
            .map_err(|_| NetError::Shutdown)?;
        response.await.map_err(|_| NetError::Shutdown)
    }

    /// Check if the stack task is still running
    pub fn is_running(&self) -> bool {
        self.running
            && self
                .task_handle
                .as_ref()
                .is_some_and(|h| !h.is_finished())
    }

    /// Wait for the stack task to complete
    pub async fn wait(&mut self) -> NetResult<()> {
        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|_| NetError::Shutdown)?,
            None => Ok(()),
        }
    }

    /// Shutdown the stack task gracefully
    pub async fn shutdown(&mut self) -> NetResult<()> {
        info!("Shutting down netmux runtime");

        let _ = self.request_sender.send(StackRequest::Shutdown).await;
        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => warn!("Stack task ended abnormally: {}", e),
                Err(_) => warn!("Stack task did not stop in time"),
            }
        }

        self.running = false;
        info!("netmux runtime shut down");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Create a runtime with the testing configuration
pub async fn create_test_runtime<S>(stack: S) -> NetResult<Runtime<S>>
where
    S: NetworkStack + Send + 'static,
    S::TcpPcb: Send + 'static,
    S::UdpPcb: Send + 'static,
{
    RuntimeBuilder::new(stack)
        .with_config(NetmuxConfig::testing())
        .build_and_start()
        .await
}
