//! netmux Runtime
//!
//! Hosts the multiplexer on tokio:
//! - `StackTask`: the single task that owns the dispatcher and the engine
//! - `ClientHandle`: per-client command surface with event wake-ups
//! - `RuntimeBuilder`: wiring of channels, notifiers and the task
//!
//! `netmux-core` holds the state machines; this crate only decides where
//! they run.

pub mod builder;
pub mod channels;
pub mod client;
pub mod notifier;
pub mod request;
pub mod task;

pub use builder::{create_test_runtime, Runtime, RuntimeBuilder};
pub use channels::{
    create_request_channel, create_stack_event_channel, ChannelError, NonBlockingSend,
    RequestReceiver, RequestSender, StackEventReceiver, StackEventSender,
};
pub use client::ClientHandle;
pub use notifier::ClientNotifiers;
pub use request::{Operation, Reply, RuntimeStats, StackRequest};
pub use task::StackTask;

// Re-export core types for convenience
pub use netmux_core::{
    ClientEvent, ClientId, ConnectionId, ConnectionState, DnsAnswer, EventKind, NetError,
    NetResult, NetmuxConfig, NetworkStack, Protocol, SlotInfo, StackEvent,
};
