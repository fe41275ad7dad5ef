use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use shared::{
    domain::{ChannelId, MessageId},
    snapshot::ChannelSnapshot,
};
use storage::MediaCache;
use tracing::{debug, warn};

/// Channel id -> every message id cached for it, thread replies included.
pub type ChannelMessages = BTreeMap<ChannelId, BTreeSet<MessageId>>;

pub fn channel_messages(channels: &[ChannelSnapshot]) -> ChannelMessages {
    channels
        .iter()
        .filter_map(|channel| {
            let id = channel.id.clone()?;
            Some((id, channel.message_ids().cloned().collect()))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDiff {
    pub removed_channels: Vec<ChannelId>,
    pub removed_messages: Vec<(ChannelId, MessageId)>,
}

impl MediaDiff {
    pub fn is_empty(&self) -> bool {
        self.removed_channels.is_empty() && self.removed_messages.is_empty()
    }
}

pub fn diff(old: &ChannelMessages, new: &ChannelMessages) -> MediaDiff {
    let mut diff = MediaDiff::default();
    for (channel_id, old_messages) in old {
        let Some(new_messages) = new.get(channel_id) else {
            diff.removed_channels.push(channel_id.clone());
            continue;
        };
        diff.removed_messages.extend(
            old_messages
                .difference(new_messages)
                .map(|message_id| (channel_id.clone(), message_id.clone())),
        );
    }
    diff
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub diff: MediaDiff,
    pub failed_evictions: usize,
}

/// Evicts media for channels and messages present in `old` but gone from
/// `new`. Every eviction runs concurrently; one failing does not stop the
/// rest.
pub async fn remove_orphaned_media(
    media: &dyn MediaCache,
    old: &[ChannelSnapshot],
    new: &[ChannelSnapshot],
) -> ReconcileReport {
    let diff = diff(&channel_messages(old), &channel_messages(new));
    if diff.is_empty() {
        return ReconcileReport::default();
    }

    let mut labels = Vec::new();
    let mut evictions = Vec::new();
    for channel_id in &diff.removed_channels {
        labels.push(format!("attachments of channel {channel_id}"));
        evictions.push(media.remove_channel_attachments(channel_id));
        labels.push(format!("avatars of channel {channel_id}"));
        evictions.push(media.remove_channel_avatars(channel_id));
    }
    for (channel_id, message_id) in &diff.removed_messages {
        labels.push(format!("attachments of message {message_id} in channel {channel_id}"));
        evictions.push(media.remove_message_attachments(channel_id, message_id));
    }

    let mut failed_evictions = 0;
    for (label, result) in labels.iter().zip(join_all(evictions).await) {
        if let Err(err) = result {
            failed_evictions += 1;
            warn!(error = %err, "failed to evict {label}");
        }
    }

    debug!(
        removed_channels = diff.removed_channels.len(),
        removed_messages = diff.removed_messages.len(),
        failed_evictions,
        "reconciled cached media"
    );

    ReconcileReport {
        diff,
        failed_evictions,
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
