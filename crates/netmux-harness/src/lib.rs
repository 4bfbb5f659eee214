//! netmux Harness
//!
//! Protocol engines for exercising the multiplexer without a real network:
//! a recording `MockStack` for deterministic dispatcher tests and an in-memory
//! `LoopbackStack` that connects local sockets to each other.

pub mod loopback;
pub mod mock;
pub mod notifier;

pub use loopback::{LoopPcb, LoopbackConfig, LoopbackStack};
pub use mock::{MockPcb, MockStack, StackCall, StackOp};
pub use notifier::RecordingNotifier;
