use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use serde_json::Value;
use shared::snapshot::{ClientSnapshot, StateData};
use storage::{KeyValueStore, MediaCache};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub mod client;
pub mod config;
pub mod entries;
pub mod error;
pub mod order;
pub mod reconcile;
pub mod watchers;

pub use client::{ChatClient, Credentials, TokenProvider};
pub use config::CacheSettings;
pub use entries::CacheKey;
pub use error::CacheError;
pub use order::{order_key, ChannelsOrder};
pub use reconcile::ReconcileReport;
pub use watchers::{AppState, NetworkStatus};

use entries::CacheEntries;
use watchers::{NetworkStateMachine, WatcherHandles};

pub const CURRENT_SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializeOptions {
    pub open_connection: bool,
}

impl Default for InitializeOptions {
    fn default() -> Self {
        Self {
            open_connection: true,
        }
    }
}

impl From<&CacheSettings> for InitializeOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            open_connection: settings.open_connection,
        }
    }
}

struct OrderState<T> {
    cached: ChannelsOrder,
    ordered: HashMap<String, Vec<T>>,
}

/// Offline cache for one chat client.
pub struct OfflineCache<C: ChatClient> {
    client: Arc<C>,
    entries: CacheEntries,
    media: Arc<dyn MediaCache>,
    credentials: Credentials,
    cache_media: bool,
    order: RwLock<OrderState<C::Channel>>,
    network: Mutex<NetworkStateMachine>,
    op_lock: Mutex<()>,
    watchers: OnceLock<WatcherHandles>,
}

impl<C: ChatClient> OfflineCache<C> {
    pub fn new(
        client: Arc<C>,
        store: Arc<dyn KeyValueStore>,
        media: Arc<dyn MediaCache>,
        credentials: Credentials,
    ) -> Arc<Self> {
        Self::new_with_media_policy(client, store, media, credentials, true)
    }

    pub fn new_with_media_policy(
        client: Arc<C>,
        store: Arc<dyn KeyValueStore>,
        media: Arc<dyn MediaCache>,
        credentials: Credentials,
        cache_media: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            entries: CacheEntries::new(store),
            media,
            credentials,
            cache_media,
            order: RwLock::new(OrderState {
                cached: ChannelsOrder::new(),
                ordered: HashMap::new(),
            }),
            network: Mutex::new(NetworkStateMachine::default()),
            op_lock: Mutex::new(()),
            watchers: OnceLock::new(),
        })
    }

    pub fn should_cache_media(&self) -> bool {
        self.cache_media
    }

    pub async fn sync(&self) -> Result<(), CacheError> {
        let _guard = self.op_lock.lock().await;
        self.sync_locked().await
    }

    async fn sync_locked(&self) -> Result<(), CacheError> {
        let Some(user_id) = self.client.user_id() else {
            debug!("skipping cache sync without an authenticated user");
            return Ok(());
        };

        let StateData { channels, client } = self.client.state_data();
        let channels_order = self.order.read().await.cached.clone();

        let (sdk_version, client_version, client_data, order, channels_written) = futures::join!(
            self.entries.write(&CacheKey::SdkVersion, CURRENT_SDK_VERSION),
            self.entries.write(&CacheKey::ClientVersion, C::LIBRARY_VERSION),
            self.entries.write(&CacheKey::ClientData, &client),
            self.entries.write(&CacheKey::ChannelsOrder, &channels_order),
            self.entries.write_channels(&channels),
        );
        sdk_version?;
        client_version?;
        client_data?;
        order?;
        let channels_written = channels_written?;

        info!(user_id = %user_id, channels = channels_written, "synced offline cache");
        Ok(())
    }

    /// Never fails: without usable cached data the client is left fresh.
    pub async fn initialize(&self, options: InitializeOptions) {
        let _guard = self.op_lock.lock().await;
        if let Err(err) = self.initialize_locked(options).await {
            warn!(error = %err, "failed to initialize from offline cache");
        }
    }

    async fn initialize_locked(&self, options: InitializeOptions) -> Result<(), CacheError> {
        let Some(client_data) = self
            .entries
            .read::<ClientSnapshot>(&CacheKey::ClientData)
            .await?
        else {
            debug!("no cached client state to restore");
            return Ok(());
        };

        let user = client_data.user_identity().ok_or(CacheError::MissingUser)?;
        self.client
            .reinitialize_auth_state(user, &self.credentials)
            .await
            .map_err(CacheError::Client)?;

        self.rehydrate_locked(Some(client_data)).await;

        if options.open_connection {
            self.spawn_open_connection();
        }
        Ok(())
    }

    pub async fn rehydrate(&self) {
        let _guard = self.op_lock.lock().await;
        self.rehydrate_locked(None).await;
    }

    async fn rehydrate_locked(&self, client_data: Option<ClientSnapshot>) {
        if let Err(err) = self.restore_state(client_data).await {
            warn!(error = %err, "failed to rehydrate offline cache; clearing it");
            if let Err(err) = self.clear_locked().await {
                error!(error = %err, "failed to clear offline cache after rehydration error");
            }
        }
    }

    async fn restore_state(&self, client_data: Option<ClientSnapshot>) -> Result<(), CacheError> {
        let client_data = match client_data {
            Some(client_data) => Some(client_data),
            None => self.entries.read(&CacheKey::ClientData).await?,
        };
        let channels = self.entries.read_channels().await?;
        let cached_order: ChannelsOrder = self
            .entries
            .read(&CacheKey::ChannelsOrder)
            .await?
            .unwrap_or_default();

        self.order.write().await.cached = cached_order;

        let (Some(client_data), Some(channels)) = (client_data, channels) else {
            debug!("offline cache is incomplete; nothing to rehydrate");
            return Ok(());
        };

        let channel_count = channels.len();
        self.client
            .reinitialize_with_state(client_data, channels)
            .await
            .map_err(CacheError::Client)?;

        let active = self.client.active_channels();
        let mut state = self.order.write().await;
        let ordered = order::order_by_cached_positions(&active, &state.cached);
        state.ordered = ordered;
        info!(
            channels = channel_count,
            channel_lists = state.ordered.len(),
            "rehydrated chat client from offline cache"
        );
        Ok(())
    }

    /// Syncs, then evicts media of channels and messages no longer cached.
    pub async fn sync_cache_and_images(&self) -> Result<ReconcileReport, CacheError> {
        let _guard = self.op_lock.lock().await;
        let old_channels = match self.entries.read_channels().await {
            Ok(channels) => channels.unwrap_or_default(),
            Err(err) => {
                warn!(
                    error = %err,
                    "previous channel snapshots unreadable; skipping media eviction"
                );
                Vec::new()
            }
        };
        self.sync_locked().await?;
        let new_channels = self.entries.read_channels().await?.unwrap_or_default();

        Ok(reconcile::remove_orphaned_media(self.media.as_ref(), &old_channels, &new_channels).await)
    }

    /// Clears the cache and reports `true` when it was written by another
    /// version of this crate or of the chat client.
    pub async fn has_new_version(&self) -> Result<bool, CacheError> {
        let _guard = self.op_lock.lock().await;
        self.has_new_version_locked().await
    }

    async fn has_new_version_locked(&self) -> Result<bool, CacheError> {
        let sdk_version: Option<String> = self.entries.read(&CacheKey::SdkVersion).await?;
        let client_version: Option<String> = self.entries.read(&CacheKey::ClientVersion).await?;

        let changed = sdk_version.as_deref() != Some(CURRENT_SDK_VERSION)
            || client_version.as_deref() != Some(C::LIBRARY_VERSION);
        if changed {
            info!(
                cached_sdk_version = sdk_version.as_deref().unwrap_or("none"),
                cached_client_version = client_version.as_deref().unwrap_or("none"),
                "cache was written by another version; clearing it"
            );
            self.clear_locked().await?;
        }
        Ok(changed)
    }

    pub async fn has_cached_data(&self) -> Result<bool, CacheError> {
        let _guard = self.op_lock.lock().await;
        if self.has_new_version_locked().await? {
            return Ok(false);
        }

        let client_data: Option<ClientSnapshot> = self.entries.read(&CacheKey::ClientData).await?;
        let channels = self.entries.read_channels().await?;
        Ok(client_data.is_some() && channels.is_some())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.op_lock.lock().await;
        self.clear_locked().await
    }

    async fn clear_locked(&self) -> Result<(), CacheError> {
        // The index has to be read before it is removed.
        let channel_ids = match self.entries.read_channel_ids().await {
            Ok(channel_ids) => channel_ids.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "channel index unreadable; clearing known keys only");
                Vec::new()
            }
        };

        let channel_removals = futures::future::join_all(channel_ids.into_iter().map(
            |channel_id| async move { self.entries.remove(&CacheKey::ChannelData(channel_id)).await },
        ));

        let (sdk, client_version, client_data, index, order, channels, media) = futures::join!(
            self.entries.remove(&CacheKey::SdkVersion),
            self.entries.remove(&CacheKey::ClientVersion),
            self.entries.remove(&CacheKey::ClientData),
            self.entries.remove(&CacheKey::ChannelsData),
            self.entries.remove(&CacheKey::ChannelsOrder),
            channel_removals,
            self.media.clear(),
        );
        sdk?;
        client_version?;
        client_data?;
        index?;
        order?;
        channels.into_iter().collect::<Result<Vec<()>, _>>()?;
        media.map_err(CacheError::Media)?;

        debug!("cleared offline cache");
        Ok(())
    }

    pub async fn sync_channels_cached_order(
        &self,
        channels: &[C::Channel],
        filters: &Value,
        sort: &Value,
    ) {
        let key = order_key(filters, sort);
        let positions = order::positions_of(channels);
        self.order.write().await.cached.insert(key, positions);
    }

    pub async fn get_ordered_channels(&self, filters: &Value, sort: &Value) -> Vec<C::Channel> {
        self.order
            .read()
            .await
            .ordered
            .get(&order_key(filters, sort))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn cached_channels_order(&self) -> ChannelsOrder {
        self.order.read().await.cached.clone()
    }

    fn spawn_open_connection(&self) {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            if let Err(err) = client.open_connection().await {
                warn!(error = %err, "failed to open chat connection");
            }
        });
    }
}

impl<C: ChatClient> Drop for OfflineCache<C> {
    fn drop(&mut self) {
        if let Some(watchers) = self.watchers.get() {
            watchers.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
