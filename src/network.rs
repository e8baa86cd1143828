//! Connectivity reporting.
//!
//! The client never probes the network itself. The host application (or a
//! test) feeds a [`NetworkStatusProvider`], and the offline queue reacts to its
//! change notifications.

use serde::Serialize;
use strum::Display;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LinkQuality {
    Unknown,
    Poor,
    Good,
}

/// Snapshot of connectivity as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub state: ConnectivityState,
    pub quality: LinkQuality,
}

impl NetworkStatus {
    pub fn online() -> Self {
        Self {
            state: ConnectivityState::Online,
            quality: LinkQuality::Unknown,
        }
    }

    pub fn offline() -> Self {
        Self {
            state: ConnectivityState::Offline,
            quality: LinkQuality::Unknown,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectivityState::Online
    }
}

/// Capability interface for connectivity: a query plus a change notification.
pub trait NetworkStatusProvider: Send + Sync {
    /// Current connectivity.
    fn status(&self) -> NetworkStatus;

    /// Receiver that observes every status change.
    fn subscribe(&self) -> watch::Receiver<NetworkStatus>;

    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }
}

/// Provider whose state is pushed in by the host application.
#[derive(Debug)]
pub struct ManualNetworkStatus {
    sender: watch::Sender<NetworkStatus>,
}

impl ManualNetworkStatus {
    pub fn new(initial: NetworkStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn online() -> Self {
        Self::new(NetworkStatus::online())
    }

    pub fn offline() -> Self {
        Self::new(NetworkStatus::offline())
    }

    pub fn set_online(&self, online: bool) {
        let state = if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };
        self.sender.send_if_modified(|status| {
            if status.state == state {
                false
            } else {
                status.state = state;
                true
            }
        });
    }

    pub fn set_quality(&self, quality: LinkQuality) {
        self.sender.send_if_modified(|status| {
            let changed = status.quality != quality;
            status.quality = quality;
            changed
        });
    }
}

impl Default for ManualNetworkStatus {
    fn default() -> Self {
        Self::online()
    }
}

impl NetworkStatusProvider for ManualNetworkStatus {
    fn status(&self) -> NetworkStatus {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_status_notifies_transitions() {
        let provider = ManualNetworkStatus::offline();
        let mut receiver = provider.subscribe();
        assert!(!provider.is_connected());

        provider.set_online(true);
        receiver.changed().await.unwrap();
        assert!(receiver.borrow_and_update().is_connected());
    }

    #[test]
    fn test_setting_same_state_does_not_notify() {
        let provider = ManualNetworkStatus::online();
        let receiver = provider.subscribe();
        provider.set_online(true);
        assert!(!receiver.has_changed().unwrap());
    }
}
