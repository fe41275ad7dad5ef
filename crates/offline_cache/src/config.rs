use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "cache.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub database_url: String,
    pub media_root: PathBuf,
    pub cache_media: bool,
    pub open_connection: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/chat_cache.db".into(),
            media_root: PathBuf::from("./data/media"),
            cache_media: true,
            open_connection: true,
        }
    }
}

pub fn load_settings() -> CacheSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |name| std::env::var(name).ok())
}

/// Defaults, then the settings file if it exists, then environment
/// overrides. Unparseable input is logged and skipped.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> CacheSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<CacheSettings>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring invalid cache settings file");
                CacheSettings::default()
            }
        },
        Err(_) => CacheSettings::default(),
    };

    if let Some(v) = env("CACHE_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__MEDIA_ROOT") {
        settings.media_root = PathBuf::from(v);
    }

    if let Some(v) = env("APP__CACHE_MEDIA") {
        match parse_flag(&v) {
            Some(flag) => settings.cache_media = flag,
            None => warn!(value = %v, "ignoring invalid APP__CACHE_MEDIA"),
        }
    }
    if let Some(v) = env("APP__OPEN_CONNECTION") {
        match parse_flag(&v) {
            Some(flag) => settings.open_connection = flag,
            None => warn!(value = %v, "ignoring invalid APP__OPEN_CONNECTION"),
        }
    }

    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Accepts sqlite URLs as well as plain file paths.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return CacheSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
