//! Client wake-ups backed by `tokio::sync::Notify`

use netmux_core::{ClientId, Notifier};
use std::sync::Arc;
use tokio::sync::Notify;

/// One `Notify` per client, shared between the stack task and the handles
///
/// `notify_one` stores a permit when nobody is waiting, so an event queued
/// between a client's empty dequeue and its wait is never missed.
#[derive(Debug, Clone)]
pub struct ClientNotifiers {
    slots: Arc<Vec<Notify>>,
}

impl ClientNotifiers {
    pub fn new(clients: usize) -> Self {
        Self {
            slots: Arc::new((0..clients).map(|_| Notify::new()).collect()),
        }
    }

    pub fn get(&self, client: ClientId) -> Option<&Notify> {
        self.slots.get(client.index())
    }

    /// Wait until `client` is notified; returns at once if a permit is stored
    pub async fn notified(&self, client: ClientId) {
        if let Some(notify) = self.get(client) {
            notify.notified().await;
        }
    }
}

impl Notifier for ClientNotifiers {
    fn notify(&self, client: ClientId) {
        if let Some(notify) = self.get(client) {
            notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_permit_survives_until_wait() {
        let notifiers = ClientNotifiers::new(2);
        let client = ClientId::new(1);
        notifiers.notify(client);

        timeout(Duration::from_millis(100), notifiers.notified(client))
            .await
            .expect("stored permit should complete the wait");
    }

    #[tokio::test]
    async fn test_other_clients_are_not_woken() {
        let notifiers = ClientNotifiers::new(2);
        notifiers.notify(ClientId::new(0));

        let waited = timeout(Duration::from_millis(20), notifiers.notified(ClientId::new(1))).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_waiter_is_woken_by_notify() {
        let notifiers = ClientNotifiers::new(1);
        let client = ClientId::new(0);
        let mut wait = tokio_test::task::spawn(notifiers.notified(client));

        tokio_test::assert_pending!(wait.poll());
        notifiers.notify(client);
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }
}
