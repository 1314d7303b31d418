//! Bot configuration: a TOML file plus environment overrides
//!
//! Secrets normally come from the environment (`VKINDER_USER_TOKEN`,
//! `VKINDER_GROUP_TOKEN`) so the file can be committed without them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::provider::{DEFAULT_FETCH_COUNT, DEFAULT_PAGE_SIZE};
use crate::vk::{DEFAULT_API_URL, DEFAULT_API_VERSION};

pub const DEFAULT_CONFIG_PATH: &str = "vkinder.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundMode {
    LongPoll,
    Callback,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub user_token: String,
    pub group_token: String,
    pub group_id: Option<u64>,
    pub api_url: String,
    pub api_version: String,
    pub database_url: String,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub inbound: InboundMode,
    pub callback: CallbackConfig,
    pub search: SearchSettings,
    pub sessions: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub port: u16,
    pub confirmation: String,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub page_size: usize,
    pub fetch_count: usize,
    pub top_photos: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub idle_ttl_secs: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            user_token: String::new(),
            group_token: String::new(),
            group_id: None,
            api_url: DEFAULT_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            database_url: "sqlite://vkinder.db".to_string(),
            log_file: None,
            log_level: "info".to_string(),
            inbound: InboundMode::LongPoll,
            callback: CallbackConfig::default(),
            search: SearchSettings::default(),
            sessions: SessionSettings::default(),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            confirmation: String::new(),
            secret: None,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fetch_count: DEFAULT_FETCH_COUNT,
            top_photos: 3,
        }
    }
}

impl SessionSettings {
    pub fn idle_ttl(&self) -> Option<Duration> {
        self.idle_ttl_secs.map(Duration::from_secs)
    }
}

// tokens stay out of logs
impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("user_token", &"<redacted>")
            .field("group_token", &"<redacted>")
            .field("group_id", &self.group_id)
            .field("api_url", &self.api_url)
            .field("api_version", &self.api_version)
            .field("database_url", &self.database_url)
            .field("log_file", &self.log_file)
            .field("log_level", &self.log_level)
            .field("inbound", &self.inbound)
            .field("callback", &self.callback)
            .field("search", &self.search)
            .field("sessions", &self.sessions)
            .finish()
    }
}

impl BotConfig {
    /// Load `path` (optional when everything comes from the environment),
    /// apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("VKINDER_USER_TOKEN") {
            self.user_token = token;
        }
        if let Some(token) = lookup("VKINDER_GROUP_TOKEN") {
            self.group_token = token;
        }
        if let Some(group_id) = lookup("VKINDER_GROUP_ID").and_then(|v| v.parse().ok()) {
            self.group_id = Some(group_id);
        }
        if let Some(url) = lookup("VKINDER_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(path) = lookup("VKINDER_LOG_FILE") {
            self.log_file = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_token.trim().is_empty() {
            bail!("user_token is required (set it in the config file or VKINDER_USER_TOKEN)");
        }
        if self.group_token.trim().is_empty() {
            bail!("group_token is required (set it in the config file or VKINDER_GROUP_TOKEN)");
        }
        if self.inbound == InboundMode::LongPoll && self.group_id.is_none() {
            bail!("group_id is required for long poll mode");
        }
        if self.search.page_size == 0 {
            bail!("search.page_size must be positive");
        }
        Ok(())
    }
}
