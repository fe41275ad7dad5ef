use shared::domain::ChannelId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage operation on '{key}' failed: {source}")]
    Storage { key: String, source: anyhow::Error },
    #[error("cached entry '{key}' could not be encoded or decoded: {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },
    #[error("channel index references '{channel_id}' but no snapshot is cached for it")]
    MissingChannelSnapshot { channel_id: ChannelId },
    #[error("cached client state has no user")]
    MissingUser,
    #[error("chat client rejected cached state: {0}")]
    Client(#[source] anyhow::Error),
    #[error("media cache operation failed: {0}")]
    Media(#[source] anyhow::Error),
    #[error("lifecycle watchers are already running for this cache")]
    WatchersAlreadyStarted,
}
