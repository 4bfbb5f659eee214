//! Per-Client Event Queues
//!
//! Every client owns one bounded FIFO of pending events. The queues are only
//! touched by the stack task; clients read them through the dequeue command
//! after being woken by a [`Notifier`].

use crate::config::QueueConfig;
use crate::errors::{NetError, NetResult};
use crate::event::{ClientEvent, EventKind};
use crate::types::{ClientId, ConnectionId};
use alloc::collections::VecDeque;
use alloc::vec::Vec;

#[cfg(not(feature = "std"))]
use log::{debug, warn};
#[cfg(feature = "std")]
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Notification
// ----------------------------------------------------------------------------

/// Out-of-band wake-up of a client that has events waiting
pub trait Notifier {
    fn notify(&self, client: ClientId);
}

/// Notifier for callers that poll their queues instead of waiting
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _client: ClientId) {}
}

impl<N: Notifier + ?Sized> Notifier for alloc::sync::Arc<N> {
    fn notify(&self, client: ClientId) {
        (**self).notify(client)
    }
}

// ----------------------------------------------------------------------------
// Event Queues
// ----------------------------------------------------------------------------

/// Fixed set of bounded per-client event queues
pub struct EventQueues<N: Notifier> {
    queues: Vec<VecDeque<ClientEvent>>,
    capacity: usize,
    notifier: N,
}

impl<N: Notifier> EventQueues<N> {
    /// Create queues sized from configuration
    pub fn new(config: &QueueConfig, notifier: N) -> Self {
        Self::with_capacity(config.max_clients, config.queue_capacity, notifier)
    }

    /// Create `clients` queues holding `capacity` events each
    pub fn with_capacity(clients: usize, capacity: usize, notifier: N) -> Self {
        let queues = (0..clients)
            .map(|_| VecDeque::with_capacity(capacity))
            .collect();
        Self {
            queues,
            capacity,
            notifier,
        }
    }

    /// Events each queue can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of client queues
    pub fn clients(&self) -> usize {
        self.queues.len()
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Whether `client` names one of the queues
    pub fn is_valid_client(&self, client: ClientId) -> bool {
        client.index() < self.queues.len()
    }

    /// Queue an event for `client` and wake it
    ///
    /// A full queue rejects the event with `NoMemory` and leaves its contents
    /// unchanged; the event is lost. An unknown client gets `Invalid`.
    pub fn enqueue_and_notify(
        &mut self,
        client: ClientId,
        id: ConnectionId,
        kind: EventKind,
    ) -> NetResult<()> {
        self.enqueue_event_and_notify(client, ClientEvent::new(kind, id))
    }

    /// Queue a prepared event for `client` and wake it
    pub fn enqueue_event_and_notify(&mut self, client: ClientId, event: ClientEvent) -> NetResult<()> {
        let capacity = self.capacity;
        let queue = self
            .queues
            .get_mut(client.index())
            .ok_or(NetError::Invalid)?;

        if queue.len() >= capacity {
            warn!(
                "Event queue for {} full, dropping {:?} for {}",
                client, event.kind, event.id
            );
            return Err(NetError::NoMemory);
        }

        queue.push_back(event);
        debug!("Queued {:?} for {} ({})", event.kind, event.id, client);
        self.notifier.notify(client);
        Ok(())
    }

    /// Take the oldest event, or the empty sentinel
    ///
    /// Never blocks and never fails; an unknown client reads as empty.
    pub fn dequeue(&mut self, client: ClientId) -> ClientEvent {
        self.queues
            .get_mut(client.index())
            .and_then(VecDeque::pop_front)
            .unwrap_or(ClientEvent::NONE)
    }

    /// Wake `client` again if it still has events waiting
    pub fn renotify(&self, client: ClientId) {
        if self.len(client) > 0 {
            self.notifier.notify(client);
        }
    }

    /// Remove every event referencing connection `id`, preserving the order
    /// of the rest. Returns how many were removed.
    ///
    /// DNS results are kept: their id field holds a status code, not a
    /// connection.
    pub fn purge_connection(&mut self, client: ClientId, id: ConnectionId) -> usize {
        let Some(queue) = self.queues.get_mut(client.index()) else {
            return 0;
        };
        let before = queue.len();
        queue.retain(|event| event.kind == EventKind::DnsResult || event.id != id);
        let removed = before - queue.len();
        if removed > 0 {
            debug!("Purged {} event(s) for {} from {}", removed, id, client);
        }
        removed
    }

    /// Events waiting for `client`, zero for unknown clients
    pub fn len(&self, client: ClientId) -> usize {
        self.queues.get(client.index()).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, client: ClientId) -> bool {
        self.len(client) == 0
    }

    /// Pending events for `client`, oldest first
    pub fn pending(&self, client: ClientId) -> Vec<ClientEvent> {
        self.queues
            .get(client.index())
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    #[derive(Default)]
    struct CountingNotifier {
        wakes: RefCell<Vec<ClientId>>,
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, client: ClientId) {
            self.wakes.borrow_mut().push(client);
        }
    }

    fn queues(capacity: usize) -> EventQueues<CountingNotifier> {
        EventQueues::with_capacity(2, capacity, CountingNotifier::default())
    }

    const A: ClientId = ClientId::new(0);
    const B: ClientId = ClientId::new(1);

    fn conn(raw: i32) -> ConnectionId {
        ConnectionId::new(raw)
    }

    #[test]
    fn test_fifo_order_and_sentinel() {
        let mut q = queues(4);
        q.enqueue_and_notify(A, conn(5), EventKind::RecvData).unwrap();
        q.enqueue_and_notify(A, conn(6), EventKind::Closed).unwrap();

        assert_eq!(q.dequeue(A), ClientEvent::new(EventKind::RecvData, conn(5)));
        assert_eq!(q.dequeue(A), ClientEvent::new(EventKind::Closed, conn(6)));
        assert_eq!(q.dequeue(A), ClientEvent::NONE);
        assert_eq!(q.notifier().wakes.borrow().as_slice(), &[A, A]);
    }

    #[test]
    fn test_full_queue_rejects_and_keeps_contents() {
        let mut q = queues(2);
        q.enqueue_and_notify(A, conn(1), EventKind::RecvData).unwrap();
        q.enqueue_and_notify(A, conn(2), EventKind::RecvData).unwrap();
        assert_eq!(
            q.enqueue_and_notify(A, conn(3), EventKind::RecvData),
            Err(NetError::NoMemory)
        );
        assert_eq!(q.len(A), 2);
        assert_eq!(q.dequeue(A).id, conn(1));
        assert_eq!(q.dequeue(A).id, conn(2));
        assert!(q.dequeue(A).is_none());
        // The rejected event does not wake anyone
        assert_eq!(q.notifier().wakes.borrow().len(), 2);
    }

    #[test]
    fn test_unknown_client() {
        let mut q = queues(2);
        let stranger = ClientId::new(9);
        assert_eq!(
            q.enqueue_and_notify(stranger, conn(0), EventKind::RecvData),
            Err(NetError::Invalid)
        );
        assert!(q.dequeue(stranger).is_none());
        q.renotify(stranger);
        assert_eq!(q.purge_connection(stranger, conn(0)), 0);
        assert!(q.notifier().wakes.borrow().is_empty());
    }

    #[test]
    fn test_queues_are_independent() {
        let mut q = queues(1);
        q.enqueue_and_notify(A, conn(1), EventKind::SentData).unwrap();
        q.enqueue_and_notify(B, conn(2), EventKind::SentData).unwrap();
        assert_eq!(q.dequeue(B).id, conn(2));
        assert_eq!(q.dequeue(A).id, conn(1));
    }

    #[test]
    fn test_renotify_only_when_non_empty() {
        let mut q = queues(2);
        q.renotify(A);
        assert!(q.notifier().wakes.borrow().is_empty());

        q.enqueue_and_notify(A, conn(1), EventKind::RecvData).unwrap();
        q.renotify(A);
        assert_eq!(q.notifier().wakes.borrow().as_slice(), &[A, A]);
    }

    #[test]
    fn test_purge_preserves_order() {
        let mut q = queues(8);
        for (raw, kind) in [
            (1, EventKind::RecvData),
            (2, EventKind::RecvData),
            (1, EventKind::SentData),
            (3, EventKind::Closed),
            (1, EventKind::Closed),
        ] {
            q.enqueue_and_notify(A, conn(raw), kind).unwrap();
        }

        assert_eq!(q.purge_connection(A, conn(1)), 3);
        assert_eq!(q.dequeue(A).id, conn(2));
        assert_eq!(q.dequeue(A).id, conn(3));
        assert!(q.dequeue(A).is_none());
        assert_eq!(q.purge_connection(A, conn(1)), 0);
    }

    #[test]
    fn test_purge_keeps_dns_results() {
        let mut q = queues(4);
        q.enqueue_event_and_notify(A, ClientEvent::dns_result(&Ok(())))
            .unwrap();
        q.enqueue_and_notify(A, conn(0), EventKind::RecvData).unwrap();

        assert_eq!(q.purge_connection(A, conn(0)), 1);
        assert_eq!(q.dequeue(A).kind, EventKind::DnsResult);
    }
}
