use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Liveness of a control backend's connection to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disabled,
    Connecting,
    Ready,
    Error,
}

impl ConnectionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionStatus::Ready)
    }
}

/// Single-writer publisher of a backend's `ConnectionStatus`. Readers subscribe and
/// get the latest value; only the owning backend publishes.
#[derive(Debug)]
pub struct ConnectionMonitor {
    name: &'static str,
    tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionMonitor {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::Disabled);
        Self { name, tx }
    }

    pub fn current(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    pub fn publish(&self, status: ConnectionStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::info!(backend = self.name, from = ?previous, to = ?status, "connection status changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_latest_status() {
        let monitor = ConnectionMonitor::new("test");
        let mut rx = monitor.subscribe();
        assert_eq!(monitor.current(), ConnectionStatus::Disabled);

        monitor.publish(ConnectionStatus::Ready);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionStatus::Ready);
        assert!(monitor.current().is_ready());
    }
}
