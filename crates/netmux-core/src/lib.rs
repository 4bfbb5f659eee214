//! netmux Core
//!
//! Client multiplexing for a callback-driven TCP/IP stack. A single stack task
//! owns the protocol engine; this crate gives it:
//!
//! - a fixed-capacity [`ConnectionRegistry`] mapping socket identifiers to
//!   engine handles and unread receive data,
//! - bounded per-client [`EventQueues`] with notify, dequeue and purge,
//! - the [`Dispatcher`], which turns engine callbacks into queued client
//!   events and implements the client command surface.
//!
//! The crate is `no_std` compatible (with `alloc`); the `std` feature switches
//! logging to `tracing` and error types to `thiserror`.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod queue;
pub mod registry;
pub mod stack;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{NetmuxConfig, QueueConfig, RegistryConfig, RuntimeConfig};
pub use dispatch::{DispatchStats, Dispatcher, DnsAnswer, Verdict};
pub use errors::{status_code, NetError, NetResult, StackError, SUCCESS};
pub use event::{ClientEvent, EventKind};
pub use queue::{EventQueues, NoopNotifier, Notifier};
pub use registry::{ConnectionRegistry, Segment, SlotInfo};
pub use stack::{EventOf, HandleOf, NetworkStack, StackEvent, StackHandle};
pub use types::{ClientId, ConnectionId, ConnectionState, Protocol, SegmentId};
