//! Key layout of the persisted cache and typed access on top of the raw
//! key-value store.

use std::{collections::HashSet, fmt, sync::Arc};

use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use shared::{domain::ChannelId, snapshot::ChannelSnapshot};
use storage::KeyValueStore;
use tracing::debug;

use crate::error::CacheError;

pub const CLIENT_DATA_KEY: &str = "chat_cache.client_data";
pub const CHANNELS_DATA_KEY: &str = "chat_cache.channels_data";
pub const CHANNELS_ORDER_KEY: &str = "chat_cache.channels_order";
pub const SDK_VERSION_KEY: &str = "chat_cache.sdk_version";
pub const CLIENT_VERSION_KEY: &str = "chat_cache.client_version";
pub const CHANNEL_DATA_PREFIX: &str = "chat_cache.channel_data.";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ClientData,
    /// Snapshot of one channel.
    ChannelData(ChannelId),
    /// Index of every channel id with a `ChannelData` entry.
    ChannelsData,
    ChannelsOrder,
    SdkVersion,
    ClientVersion,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientData => f.write_str(CLIENT_DATA_KEY),
            Self::ChannelData(channel_id) => write!(f, "{CHANNEL_DATA_PREFIX}{channel_id}"),
            Self::ChannelsData => f.write_str(CHANNELS_DATA_KEY),
            Self::ChannelsOrder => f.write_str(CHANNELS_ORDER_KEY),
            Self::SdkVersion => f.write_str(SDK_VERSION_KEY),
            Self::ClientVersion => f.write_str(CLIENT_VERSION_KEY),
        }
    }
}

#[derive(Clone)]
pub(crate) struct CacheEntries {
    store: Arc<dyn KeyValueStore>,
}

impl CacheEntries {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub(crate) async fn read<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<T>, CacheError> {
        let key = key.to_string();
        let raw = self
            .store
            .get_item(&key)
            .await
            .map_err(|source| CacheError::Storage {
                key: key.clone(),
                source,
            })?;
        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|source| CacheError::Serialization { key, source })
    }

    pub(crate) async fn write<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<(), CacheError> {
        let key = key.to_string();
        let raw = serde_json::to_string(value).map_err(|source| CacheError::Serialization {
            key: key.clone(),
            source,
        })?;
        self.store
            .set_item(&key, Some(raw))
            .await
            .map_err(|source| CacheError::Storage { key, source })
    }

    pub(crate) async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        let key = key.to_string();
        self.store
            .remove_item(&key)
            .await
            .map_err(|source| CacheError::Storage { key, source })
    }

    /// Writes the channel id index and one entry per channel. Channels
    /// without an id cannot be addressed and are skipped. Entries of channels
    /// that dropped out of the index are removed afterwards.
    pub(crate) async fn write_channels(
        &self,
        channels: &[ChannelSnapshot],
    ) -> Result<usize, CacheError> {
        let previous_ids = match self.read_channel_ids().await {
            Ok(ids) => ids.unwrap_or_default(),
            Err(err) => {
                debug!(error = %err, "previous channel index unreadable; not pruning");
                Vec::new()
            }
        };

        let addressable: Vec<(&ChannelId, &ChannelSnapshot)> = channels
            .iter()
            .filter_map(|channel| channel.id.as_ref().map(|id| (id, channel)))
            .collect();
        let channel_ids: Vec<&ChannelId> = addressable.iter().map(|(id, _)| *id).collect();

        let entry_writes = addressable.iter().map(|(id, channel)| async move {
            self.write(&CacheKey::ChannelData((*id).clone()), *channel)
                .await
        });
        join_all(entry_writes)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, _>>()?;

        // Only index channels whose entries are all in place.
        self.write(&CacheKey::ChannelsData, &channel_ids).await?;

        let current: HashSet<&ChannelId> = channel_ids.iter().copied().collect();
        let stale = previous_ids
            .into_iter()
            .filter(|channel_id| !current.contains(channel_id))
            .map(|channel_id| async move { self.remove(&CacheKey::ChannelData(channel_id)).await });
        join_all(stale)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, _>>()?;

        Ok(addressable.len())
    }

    /// `None` when no channel index has been written yet.
    pub(crate) async fn read_channels(&self) -> Result<Option<Vec<ChannelSnapshot>>, CacheError> {
        let Some(channel_ids) = self.read_channel_ids().await? else {
            return Ok(None);
        };

        let reads = channel_ids.into_iter().map(|channel_id| async move {
            match self
                .read::<ChannelSnapshot>(&CacheKey::ChannelData(channel_id.clone()))
                .await?
            {
                Some(snapshot) => Ok(snapshot),
                None => Err(CacheError::MissingChannelSnapshot { channel_id }),
            }
        });

        join_all(reads)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub(crate) async fn read_channel_ids(&self) -> Result<Option<Vec<ChannelId>>, CacheError> {
        self.read(&CacheKey::ChannelsData).await
    }
}
