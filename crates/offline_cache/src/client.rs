use std::{fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ChannelIdentity, UserId},
    snapshot::{ChannelSnapshot, ClientSnapshot, StateData, UserIdentity},
};

/// The chat backend client the cache persists and restores.
///
/// Connection handling, real-time events and API calls all stay inside the
/// implementation; the cache only copies state out and hands it back.
#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    type Channel: ChannelIdentity + Clone + Send + Sync + 'static;

    /// Build-time version of the client library. Cached state written by a
    /// different version is discarded.
    const LIBRARY_VERSION: &'static str;

    fn user_id(&self) -> Option<UserId>;

    fn state_data(&self) -> StateData;

    fn active_channels(&self) -> Vec<Self::Channel>;

    async fn reinitialize_auth_state(
        &self,
        user: UserIdentity,
        credentials: &Credentials,
    ) -> Result<()>;

    async fn reinitialize_with_state(
        &self,
        client: ClientSnapshot,
        channels: Vec<ChannelSnapshot>,
    ) -> Result<()>;

    /// Must be safe to call while a connection is already being established.
    async fn open_connection(&self) -> Result<()>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

#[derive(Clone)]
pub enum Credentials {
    Token(String),
    Provider(Arc<dyn TokenProvider>),
}

impl Credentials {
    pub async fn resolve(&self) -> Result<String> {
        match self {
            Self::Token(token) => Ok(token.clone()),
            Self::Provider(provider) => provider.token().await,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Credentials::Token(<redacted>)"),
            Self::Provider(_) => f.write_str("Credentials::Provider(..)"),
        }
    }
}
