use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use shared::domain::{ChannelId, MessageId};
use tracing::debug;

const ATTACHMENTS_DIR: &str = "attachments";
const AVATARS_DIR: &str = "avatars";

/// Binary media (attachments, avatars) cached alongside chat state.
///
/// Removing media that was never cached is not an error.
#[async_trait]
pub trait MediaCache: Send + Sync {
    async fn remove_channel_attachments(&self, channel_id: &ChannelId) -> Result<()>;
    async fn remove_channel_avatars(&self, channel_id: &ChannelId) -> Result<()>;
    async fn remove_message_attachments(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Used when media caching is switched off.
pub struct NoopMediaCache;

#[async_trait]
impl MediaCache for NoopMediaCache {
    async fn remove_channel_attachments(&self, _channel_id: &ChannelId) -> Result<()> {
        Ok(())
    }

    async fn remove_channel_avatars(&self, _channel_id: &ChannelId) -> Result<()> {
        Ok(())
    }

    async fn remove_message_attachments(
        &self,
        _channel_id: &ChannelId,
        _message_id: &MessageId,
    ) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// Media cache laid out on disk as
/// `<root>/attachments/<channel>/<message>/<file>` and
/// `<root>/avatars/<channel>/<file>`.
#[derive(Debug, Clone)]
pub struct FsMediaCache {
    root: PathBuf,
}

impl FsMediaCache {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create media root '{}'", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn store_attachment(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self
            .channel_attachments_dir(channel_id)?
            .join(path_component(message_id.as_str())?);
        write_file(&dir, file_name, bytes).await
    }

    pub async fn store_avatar(
        &self,
        channel_id: &ChannelId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.channel_avatars_dir(channel_id)?;
        write_file(&dir, file_name, bytes).await
    }

    pub async fn cached_attachment(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        file_name: &str,
    ) -> Result<Option<PathBuf>> {
        let path = self
            .channel_attachments_dir(channel_id)?
            .join(path_component(message_id.as_str())?)
            .join(path_component(file_name)?);
        existing(path).await
    }

    pub async fn cached_avatar(
        &self,
        channel_id: &ChannelId,
        file_name: &str,
    ) -> Result<Option<PathBuf>> {
        let path = self
            .channel_avatars_dir(channel_id)?
            .join(path_component(file_name)?);
        existing(path).await
    }

    fn channel_attachments_dir(&self, channel_id: &ChannelId) -> Result<PathBuf> {
        Ok(self
            .root
            .join(ATTACHMENTS_DIR)
            .join(path_component(channel_id.as_str())?))
    }

    fn channel_avatars_dir(&self, channel_id: &ChannelId) -> Result<PathBuf> {
        Ok(self
            .root
            .join(AVATARS_DIR)
            .join(path_component(channel_id.as_str())?))
    }
}

#[async_trait]
impl MediaCache for FsMediaCache {
    async fn remove_channel_attachments(&self, channel_id: &ChannelId) -> Result<()> {
        remove_dir_if_exists(&self.channel_attachments_dir(channel_id)?).await
    }

    async fn remove_channel_avatars(&self, channel_id: &ChannelId) -> Result<()> {
        remove_dir_if_exists(&self.channel_avatars_dir(channel_id)?).await
    }

    async fn remove_message_attachments(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<()> {
        let dir = self
            .channel_attachments_dir(channel_id)?
            .join(path_component(message_id.as_str())?);
        remove_dir_if_exists(&dir).await
    }

    async fn clear(&self) -> Result<()> {
        remove_dir_if_exists(&self.root).await?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to recreate media root '{}'", self.root.display()))
    }
}

/// Ids come from the chat backend; refuse anything that would escape the
/// media root.
fn path_component(raw: &str) -> Result<&str> {
    if raw.is_empty() || raw == "." || raw == ".." || raw.contains(['/', '\\']) {
        bail!("'{raw}' cannot be used as a media cache path component");
    }
    Ok(raw)
}

async fn write_file(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.join(path_component(file_name)?);
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create media dir '{}'", dir.display()))?;
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write media file '{}'", path.display()))?;
    Ok(path)
}

async fn existing(path: PathBuf) -> Result<Option<PathBuf>> {
    match tokio::fs::metadata(&path).await {
        Ok(_) => Ok(Some(path)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to stat '{}'", path.display())),
    }
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!(path = %dir.display(), "removed cached media");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove '{}'", dir.display())),
    }
}

#[cfg(test)]
#[path = "tests/media_tests.rs"]
mod tests;
