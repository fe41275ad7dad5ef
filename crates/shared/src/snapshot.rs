//! Serializable projections of chat client state.
//!
//! Only the fields the cache reasons about are typed; everything else the
//! client hands over is carried through untouched in `extra`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ChannelId, ChannelIdentity, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Minimal identity handed back to the client when re-authenticating from
/// cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSnapshot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientSnapshot {
    pub fn user_identity(&self) -> Option<UserIdentity> {
        self.user.as_ref().map(|user| UserIdentity {
            id: user.id.clone(),
            name: user.name.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub id: MessageId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageSnapshot {
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStateSnapshot {
    #[serde(default)]
    pub messages: Vec<MessageSnapshot>,
    /// Thread replies keyed by parent message id.
    #[serde(default)]
    pub threads: BTreeMap<MessageId, Vec<MessageSnapshot>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ChannelId>,
    #[serde(default)]
    pub state: ChannelStateSnapshot,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChannelSnapshot {
    pub fn new(id: impl Into<ChannelId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_messages<I, M>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MessageId>,
    {
        self.state
            .messages
            .extend(ids.into_iter().map(MessageSnapshot::new));
        self
    }

    pub fn with_thread<I, M>(mut self, parent_id: impl Into<MessageId>, replies: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MessageId>,
    {
        self.state
            .threads
            .entry(parent_id.into())
            .or_default()
            .extend(replies.into_iter().map(MessageSnapshot::new));
        self
    }

    /// Ids of the channel's own messages followed by every thread reply.
    pub fn message_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.state.messages.iter().map(|m| &m.id).chain(
            self.state
                .threads
                .values()
                .flat_map(|replies| replies.iter().map(|m| &m.id)),
        )
    }
}

impl ChannelIdentity for ChannelSnapshot {
    fn channel_id(&self) -> Option<&ChannelId> {
        self.id.as_ref()
    }
}

/// Everything the client exposes for persistence in one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    pub channels: Vec<ChannelSnapshot>,
    pub client: ClientSnapshot,
}
