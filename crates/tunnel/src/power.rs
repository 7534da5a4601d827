//! Suspend/resume notifications

use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend,
    Resume,
}

/// Fan-out point for OS power notifications.
///
/// Whatever receives the OS callbacks calls [`PowerMonitor::notify`]; each
/// connected tunnel holds its own subscription for as long as it is up.
#[derive(Debug, Clone)]
pub struct PowerMonitor {
    tx: broadcast::Sender<PowerEvent>,
}

impl PowerMonitor {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PowerEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event; returns how many subscribers received it
    pub fn notify(&self, event: PowerEvent) -> usize {
        debug!("Power event: {:?}", event);
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for PowerMonitor {
    fn default() -> Self {
        Self::new()
    }
}
