use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{
    domain::{ChannelId, ChannelIdentity, MessageId, UserId},
    snapshot::{ChannelSnapshot, ClientSnapshot, StateData, UserIdentity, UserSnapshot},
};
use storage::{KeyValueStore, MediaCache, MemoryKeyValueStore};

use crate::{ChatClient, Credentials, OfflineCache};

pub(crate) const TEST_TOKEN: &str = "test-token";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FakeChannel {
    pub id: Option<ChannelId>,
}

impl FakeChannel {
    pub fn named(id: &str) -> Self {
        Self {
            id: Some(ChannelId::from(id)),
        }
    }
}

impl ChannelIdentity for FakeChannel {
    fn channel_id(&self) -> Option<&ChannelId> {
        self.id.as_ref()
    }
}

#[derive(Default)]
pub(crate) struct FakeChatClient {
    user_id: StdMutex<Option<UserId>>,
    state: StdMutex<StateData>,
    active: StdMutex<Vec<FakeChannel>>,
    auth_calls: StdMutex<Vec<(UserIdentity, String)>>,
    restored: StdMutex<Vec<(ClientSnapshot, Vec<ChannelSnapshot>)>>,
    open_connection_calls: AtomicUsize,
    fail_restore: AtomicBool,
}

impl FakeChatClient {
    pub fn logged_out() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logged_in(user_id: &str, channels: Vec<ChannelSnapshot>) -> Arc<Self> {
        let mut extra = Map::new();
        extra.insert("role".into(), Value::from("user"));
        let client = ClientSnapshot {
            user: Some(UserSnapshot {
                id: UserId::from(user_id),
                name: Some(format!("{user_id} name")),
                extra,
            }),
            extra: Map::new(),
        };
        let fake = Self::default();
        *fake.user_id.lock().expect("lock") = Some(UserId::from(user_id));
        *fake.state.lock().expect("lock") = StateData { channels, client };
        Arc::new(fake)
    }

    pub fn set_channels(&self, channels: Vec<ChannelSnapshot>) {
        self.state.lock().expect("lock").channels = channels;
    }

    pub fn set_client_snapshot(&self, client: ClientSnapshot) {
        self.state.lock().expect("lock").client = client;
    }

    pub fn fail_restores(&self) {
        self.fail_restore.store(true, Ordering::SeqCst);
    }

    pub fn auth_calls(&self) -> Vec<(UserIdentity, String)> {
        self.auth_calls.lock().expect("lock").clone()
    }

    pub fn restore_calls(&self) -> usize {
        self.restored.lock().expect("lock").len()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|channel| channel.id.as_ref().map(ToString::to_string))
            .collect()
    }

    pub fn open_connection_calls(&self) -> usize {
        self.open_connection_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for FakeChatClient {
    type Channel = FakeChannel;

    const LIBRARY_VERSION: &'static str = "fake-client-1.0.0";

    fn user_id(&self) -> Option<UserId> {
        self.user_id.lock().expect("lock").clone()
    }

    fn state_data(&self) -> StateData {
        self.state.lock().expect("lock").clone()
    }

    fn active_channels(&self) -> Vec<FakeChannel> {
        self.active.lock().expect("lock").clone()
    }

    async fn reinitialize_auth_state(
        &self,
        user: UserIdentity,
        credentials: &Credentials,
    ) -> Result<()> {
        let token = credentials.resolve().await?;
        *self.user_id.lock().expect("lock") = Some(user.id.clone());
        self.auth_calls.lock().expect("lock").push((user, token));
        Ok(())
    }

    async fn reinitialize_with_state(
        &self,
        client: ClientSnapshot,
        channels: Vec<ChannelSnapshot>,
    ) -> Result<()> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(anyhow!("state does not match client schema"));
        }
        *self.active.lock().expect("lock") = channels
            .iter()
            .map(|channel| FakeChannel {
                id: channel.id.clone(),
            })
            .collect();
        self.restored.lock().expect("lock").push((client, channels));
        Ok(())
    }

    async fn open_connection(&self) -> Result<()> {
        self.open_connection_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingMedia {
    clears: AtomicUsize,
    evicted_messages: StdMutex<Vec<(String, String)>>,
    evicted_channels: StdMutex<Vec<String>>,
}

impl RecordingMedia {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn evicted_messages(&self) -> Vec<(String, String)> {
        let mut evicted = self.evicted_messages.lock().expect("lock").clone();
        evicted.sort();
        evicted
    }

    pub fn evicted_channels(&self) -> Vec<String> {
        let mut evicted = self.evicted_channels.lock().expect("lock").clone();
        evicted.sort();
        evicted
    }
}

#[async_trait]
impl MediaCache for RecordingMedia {
    async fn remove_channel_attachments(&self, channel_id: &ChannelId) -> Result<()> {
        self.evicted_channels
            .lock()
            .expect("lock")
            .push(format!("{channel_id}/attachments"));
        Ok(())
    }

    async fn remove_channel_avatars(&self, channel_id: &ChannelId) -> Result<()> {
        self.evicted_channels
            .lock()
            .expect("lock")
            .push(format!("{channel_id}/avatars"));
        Ok(())
    }

    async fn remove_message_attachments(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<()> {
        self.evicted_messages
            .lock()
            .expect("lock")
            .push((channel_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory store that rejects writes to one key until healed.
#[derive(Default)]
pub(crate) struct FailingStore {
    inner: MemoryKeyValueStore,
    failing_key: StdMutex<Option<String>>,
}

impl FailingStore {
    pub fn fail_writes_to(&self, key: &str) {
        *self.failing_key.lock().expect("lock") = Some(key.to_owned());
    }

    pub fn heal(&self) {
        *self.failing_key.lock().expect("lock") = None;
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: Option<String>) -> Result<()> {
        if self.failing_key.lock().expect("lock").as_deref() == Some(key) {
            return Err(anyhow!("disk full writing {key}"));
        }
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.inner.remove_item(key).await
    }
}

pub(crate) struct Harness {
    pub cache: Arc<OfflineCache<FakeChatClient>>,
    pub client: Arc<FakeChatClient>,
    pub store: Arc<MemoryKeyValueStore>,
    pub media: Arc<RecordingMedia>,
}

impl Harness {
    pub fn new(client: Arc<FakeChatClient>) -> Self {
        Self::with_store(client, Arc::new(MemoryKeyValueStore::new()))
    }

    /// A second process start over the same persisted store.
    pub fn with_store(client: Arc<FakeChatClient>, store: Arc<MemoryKeyValueStore>) -> Self {
        let media = Arc::new(RecordingMedia::default());
        let cache = OfflineCache::new(
            Arc::clone(&client),
            store.clone(),
            media.clone(),
            Credentials::Token(TEST_TOKEN.into()),
        );
        Self {
            cache,
            client,
            store,
            media,
        }
    }
}

pub(crate) async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {description}");
}
