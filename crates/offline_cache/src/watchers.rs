use std::sync::{Arc, Weak};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{client::ChatClient, error::CacheError, OfflineCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

impl AppState {
    pub fn is_backgrounded(self) -> bool {
        matches!(self, Self::Inactive | Self::Background)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub is_connected: bool,
    /// `None` until the platform has probed reachability.
    pub is_internet_reachable: Option<bool>,
}

impl NetworkStatus {
    pub fn online() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: Some(false),
        }
    }

    fn is_online(self) -> bool {
        self.is_connected && self.is_internet_reachable == Some(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransition {
    /// First known reachability, taken over without side effects.
    Adopted(bool),
    Reconnect,
    WentOffline,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct NetworkStateMachine {
    current: Option<bool>,
}

impl NetworkStateMachine {
    pub fn current(&self) -> Option<bool> {
        self.current
    }

    pub fn observe(&mut self, status: NetworkStatus) -> NetworkTransition {
        if let (Some(reachable), None) = (status.is_internet_reachable, self.current) {
            let online = status.is_connected && reachable;
            self.current = Some(online);
            return NetworkTransition::Adopted(online);
        }

        let online = status.is_online();
        if online && self.current != Some(true) {
            self.current = Some(true);
            NetworkTransition::Reconnect
        } else if !online && self.current == Some(true) {
            // Transport teardown is the client's job.
            self.current = Some(false);
            NetworkTransition::WentOffline
        } else {
            NetworkTransition::Unchanged
        }
    }
}

pub(crate) struct WatcherHandles {
    app_state: JoinHandle<()>,
    network: JoinHandle<()>,
}

impl WatcherHandles {
    pub(crate) fn abort(&self) {
        self.app_state.abort();
        self.network.abort();
    }
}

impl<C: ChatClient> OfflineCache<C> {
    /// Subscribes the cache to app lifecycle and connectivity changes.
    ///
    /// Runs at most once per cache; the watcher tasks stop when the cache is
    /// dropped or the senders go away.
    pub fn start_watchers(
        self: &Arc<Self>,
        app_states: broadcast::Receiver<AppState>,
        network_statuses: broadcast::Receiver<NetworkStatus>,
    ) -> Result<(), CacheError> {
        if self.watchers.get().is_some() {
            return Err(CacheError::WatchersAlreadyStarted);
        }

        let handles = WatcherHandles {
            app_state: spawn_app_state_watcher(Arc::downgrade(self), app_states),
            network: spawn_network_watcher(Arc::downgrade(self), network_statuses),
        };
        if let Err(handles) = self.watchers.set(handles) {
            handles.abort();
            return Err(CacheError::WatchersAlreadyStarted);
        }
        Ok(())
    }

    pub async fn current_network_state(&self) -> Option<bool> {
        self.network.lock().await.current()
    }

    async fn handle_app_state(self: Arc<Self>, state: AppState) {
        if !state.is_backgrounded() {
            return;
        }
        debug!(?state, "app left the foreground; syncing offline cache");
        tokio::spawn(async move {
            if let Err(err) = self.sync().await {
                warn!(error = %err, "background cache sync failed");
            }
        });
    }

    async fn handle_network_status(&self, status: NetworkStatus) {
        let transition = self.network.lock().await.observe(status);
        match transition {
            NetworkTransition::Reconnect => {
                info!("network is back; reopening chat connection");
                self.spawn_open_connection();
            }
            NetworkTransition::WentOffline => info!("network lost"),
            NetworkTransition::Adopted(online) => debug!(online, "initial network state"),
            NetworkTransition::Unchanged => {}
        }
    }
}

fn spawn_app_state_watcher<C: ChatClient>(
    cache: Weak<OfflineCache<C>>,
    mut events: broadcast::Receiver<AppState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(state) => {
                    let Some(cache) = cache.upgrade() else { break };
                    cache.handle_app_state(state).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "app state watcher lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_network_watcher<C: ChatClient>(
    cache: Weak<OfflineCache<C>>,
    mut events: broadcast::Receiver<NetworkStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(status) => {
                    let Some(cache) = cache.upgrade() else { break };
                    cache.handle_network_status(status).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "network watcher lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/watchers_tests.rs"]
mod tests;
