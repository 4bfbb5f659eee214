//! Notifier that remembers every wake-up

use netmux_core::{ClientId, Notifier};
use std::sync::Mutex;

/// Records each notification so tests can assert on wake-ups
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    wakes: Mutex<Vec<ClientId>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wake-up so far, oldest first
    pub fn wakes(&self) -> Vec<ClientId> {
        self.wakes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Number of wake-ups delivered to `client`
    pub fn count_for(&self, client: ClientId) -> usize {
        self.wakes
            .lock()
            .map(|w| w.iter().filter(|c| **c == client).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut wakes) = self.wakes.lock() {
            wakes.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, client: ClientId) {
        if let Ok(mut wakes) = self.wakes.lock() {
            wakes.push(client);
        }
    }
}
