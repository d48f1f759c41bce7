//! Connectivity state driven by the host application.

use tether_core::collaborators::ConnectivitySignal;
use tokio::sync::watch;

/// A [`ConnectivitySignal`] the host flips from its network callbacks.
pub struct ConnectivityState {
    tx: watch::Sender<bool>,
}

impl ConnectivityState {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Record the current reachability. Subscribers wake only on a change.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivitySignal for ConnectivityState {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_reconnect() {
        let state = ConnectivityState::new(false);
        let mut rx = state.subscribe();

        state.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(state.is_online());
    }

    #[test]
    fn setting_same_value_does_not_notify() {
        let state = ConnectivityState::new(true);
        let rx = state.subscribe();
        state.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
