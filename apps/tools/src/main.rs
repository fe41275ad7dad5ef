use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use offline_cache::{config, entries, order_key, CacheKey, ChannelsOrder};
use serde_json::Value;
use shared::{domain::ChannelId, snapshot::ChannelSnapshot};
use storage::{FsMediaCache, KeyValueStore, MediaCache, SqliteKeyValueStore};
use tracing::info;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the database from cache.toml and the environment.
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    media_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints versions, cached channels and recorded channel list orders.
    Inspect,
    /// Removes every cache entry and all cached media.
    Clear,
    /// Prints the canonical key of a channel list query.
    OrderKey {
        #[arg(long, default_value = "{}")]
        filters: String,
        #[arg(long, default_value = "{}")]
        sort: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let mut settings = config::load_settings();
    if let Some(database_url) = cli.database_url {
        settings.database_url = config::normalize_database_url(&database_url);
    }
    if let Some(media_root) = cli.media_root {
        settings.media_root = media_root;
    }

    match cli.command {
        Command::Inspect => {
            let store = SqliteKeyValueStore::new(&settings.database_url).await?;
            inspect(&store).await?;
        }
        Command::Clear => {
            let store = SqliteKeyValueStore::new(&settings.database_url).await?;
            let keys = store.keys_with_prefix("chat_cache.").await?;
            for key in &keys {
                store.remove_item(key).await?;
            }
            let media = FsMediaCache::open(&settings.media_root).await?;
            media.clear().await?;
            info!(
                entries = keys.len(),
                media_root = %settings.media_root.display(),
                "cleared offline cache"
            );
        }
        Command::OrderKey { filters, sort } => {
            let filters: Value = serde_json::from_str(&filters).context("invalid --filters")?;
            let sort: Value = serde_json::from_str(&sort).context("invalid --sort")?;
            println!("{}", order_key(&filters, &sort));
        }
    }

    Ok(())
}

async fn inspect(store: &SqliteKeyValueStore) -> Result<()> {
    let sdk_version = read_raw(store, &CacheKey::SdkVersion).await?;
    let client_version = read_raw(store, &CacheKey::ClientVersion).await?;
    println!("sdk_version={}", sdk_version.as_deref().unwrap_or("-"));
    println!("client_version={}", client_version.as_deref().unwrap_or("-"));

    let client_data = store.get_item(entries::CLIENT_DATA_KEY).await?;
    println!(
        "client_data={}",
        if client_data.is_some() {
            "present"
        } else {
            "absent"
        }
    );

    let channel_ids: Vec<ChannelId> = match store.get_item(entries::CHANNELS_DATA_KEY).await? {
        Some(raw) => serde_json::from_str(&raw).context("invalid channel index")?,
        None => Vec::new(),
    };
    println!("channels={}", channel_ids.len());
    for channel_id in channel_ids {
        let key = CacheKey::ChannelData(channel_id.clone()).to_string();
        match store.get_item(&key).await? {
            Some(raw) => {
                let snapshot: ChannelSnapshot = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid entry {key}"))?;
                println!("  {channel_id} messages={}", snapshot.message_ids().count());
            }
            None => println!("  {channel_id} missing"),
        }
    }

    let orders: ChannelsOrder = match store.get_item(entries::CHANNELS_ORDER_KEY).await? {
        Some(raw) => serde_json::from_str(&raw).context("invalid channel order")?,
        None => ChannelsOrder::new(),
    };
    println!("channel_lists={}", orders.len());
    for (key, positions) in orders {
        println!("  {key} channels={}", positions.len());
    }

    Ok(())
}

async fn read_raw(store: &SqliteKeyValueStore, key: &CacheKey) -> Result<Option<String>> {
    let Some(raw) = store.get_item(&key.to_string()).await? else {
        return Ok(None);
    };
    let value: String =
        serde_json::from_str(&raw).with_context(|| format!("invalid entry {key}"))?;
    Ok(Some(value))
}
