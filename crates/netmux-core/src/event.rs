//! Events delivered to clients through their queues

use crate::errors::{NetError, NetResult, SUCCESS};
use crate::types::ConnectionId;
use serde::{Deserialize, Serialize};

/// Kind of a queued client event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Only used by the empty-queue sentinel
    None,
    /// An outbound TCP connect completed
    NewConnection,
    /// A listener produced a new connection (the id is the new socket)
    Accepted,
    /// Data arrived on a connected socket
    RecvData,
    /// A datagram arrived on an unconnected UDP socket
    RecvFromData,
    /// The stack acknowledged sent data
    SentData,
    /// The remote side closed the connection
    Closed,
    /// The connection was aborted; the socket is gone
    Aborted,
    /// The connection reset or timed out; the socket is gone
    TimedOut,
    /// A name resolution finished; the id carries the status code
    DnsResult,
}

impl EventKind {
    /// Whether the socket named by the event no longer exists
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Aborted | EventKind::TimedOut)
    }
}

/// One queue entry: an event kind and the connection it concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientEvent {
    pub kind: EventKind,
    pub id: ConnectionId,
}

impl ClientEvent {
    /// Returned by a dequeue on an empty queue
    pub const NONE: ClientEvent = ClientEvent {
        kind: EventKind::None,
        id: ConnectionId::INVALID,
    };

    pub fn new(kind: EventKind, id: ConnectionId) -> Self {
        Self { kind, id }
    }

    /// Build a DNS result event carrying `status` in its id field
    pub fn dns_result(status: &NetResult<()>) -> Self {
        let code = match status {
            Ok(()) => SUCCESS,
            Err(e) => e.code(),
        };
        Self::new(EventKind::DnsResult, ConnectionId::new(code))
    }

    /// Whether this is the empty sentinel
    pub fn is_none(&self) -> bool {
        self.kind == EventKind::None
    }

    /// Decode the status of a DNS result event
    pub fn dns_status(&self) -> Option<NetResult<()>> {
        if self.kind != EventKind::DnsResult {
            return None;
        }
        let code = self.id.raw();
        if code == SUCCESS {
            Some(Ok(()))
        } else {
            Some(Err(NetError::from_code(code).unwrap_or(NetError::Invalid)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel() {
        assert!(ClientEvent::NONE.is_none());
        assert_eq!(ClientEvent::NONE.id, ConnectionId::INVALID);
        assert!(!ClientEvent::new(EventKind::RecvData, ConnectionId::new(0)).is_none());
    }

    #[test]
    fn test_dns_status_encoding() {
        let found = ClientEvent::dns_result(&Ok(()));
        assert_eq!(found.dns_status(), Some(Ok(())));

        let missing = ClientEvent::dns_result(&Err(NetError::NoMemory));
        assert_eq!(missing.dns_status(), Some(Err(NetError::NoMemory)));

        let other = ClientEvent::new(EventKind::Closed, ConnectionId::new(0));
        assert_eq!(other.dns_status(), None);
    }
}
