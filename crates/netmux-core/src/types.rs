//! Core identifier types shared by the registry, the event queues and the
//! command surface

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Client Identifier
// ----------------------------------------------------------------------------

/// Index of a client task
///
/// Valid only when below the configured client count; everything that takes a
/// `ClientId` checks the bound itself and reports `Invalid` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u8);

impl ClientId {
    /// Create a client identifier
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Queue index for this client
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

impl From<u8> for ClientId {
    fn from(index: u8) -> Self {
        Self(index)
    }
}

// ----------------------------------------------------------------------------
// Connection Identifier
// ----------------------------------------------------------------------------

/// Opaque socket identifier handed to clients
///
/// For an active socket this is the registry slot index. `DnsResult` events
/// reuse the same field to carry a numeric status code instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(i32);

impl ConnectionId {
    /// Identifier that never names a connection
    pub const INVALID: ConnectionId = ConnectionId(-1);

    /// Wrap a raw identifier
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Identifier for a registry slot
    pub fn from_index(index: usize) -> Self {
        Self(i32::try_from(index).unwrap_or(-1))
    }

    /// Raw value as seen by clients
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Slot index, if the identifier could name a slot at all
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Segment Identifier
// ----------------------------------------------------------------------------

/// Identity of one buffered receive segment, used to unlink it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub(crate) u64);

impl SegmentId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Protocol and State
// ----------------------------------------------------------------------------

/// Transport protocol of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Connection lifecycle state of a slot
///
/// UDP sockets are `Connected` as soon as they are opened; the other states
/// only apply to TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Null,
    ConnectPending,
    Connected,
    Listening,
}
