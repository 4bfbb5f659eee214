//! Channel Utilities for the Stack Task
//!
//! Two bounded channels feed the stack task: client requests and callbacks
//! injected by an engine running outside the task (an interrupt bridge, a
//! driver thread). Both are tokio mpsc channels sized from `RuntimeConfig`.

use crate::request::StackRequest;
use netmux_core::{EventOf, RuntimeConfig};
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    ChannelFull,
    ChannelClosed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ChannelFull => write!(f, "Channel buffer is full"),
            ChannelError::ChannelClosed => write!(f, "Channel is closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

pub type RequestSender = mpsc::Sender<StackRequest>;
pub type RequestReceiver = mpsc::Receiver<StackRequest>;
pub type StackEventSender<S> = mpsc::Sender<EventOf<S>>;
pub type StackEventReceiver<S> = mpsc::Receiver<EventOf<S>>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded request channel (clients → stack task)
pub fn create_request_channel(config: &RuntimeConfig) -> (RequestSender, RequestReceiver) {
    mpsc::channel(config.request_buffer_size)
}

/// Create bounded callback channel (external engine → stack task)
pub fn create_stack_event_channel<S: netmux_core::NetworkStack>(
    config: &RuntimeConfig,
) -> (StackEventSender<S>, StackEventReceiver<S>) {
    mpsc::channel(config.stack_event_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-blocking Send Utilities
// ----------------------------------------------------------------------------

/// Non-blocking send for producers that must never wait, such as engine
/// callbacks raised from interrupt context
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl<T> NonBlockingSend<T> for mpsc::Sender<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_blocking_send_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel::<u8>(1);
        assert_eq!(tx.try_send_non_blocking(1), Ok(()));
        assert_eq!(tx.try_send_non_blocking(2), Err(ChannelError::ChannelFull));
        drop(rx);
        assert_eq!(tx.try_send_non_blocking(3), Err(ChannelError::ChannelClosed));
    }
}
