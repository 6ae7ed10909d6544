use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("at least one primary topic is required")]
    NoPrimaryTopics,

    #[error("refresh_interval_ms must be greater than 0")]
    ZeroRefreshInterval,

    #[error("webhook_timeout_ms must be greater than 0")]
    ZeroWebhookTimeout,
}

/// Discord webhook targets
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Webhooks {
    /// Receives messages heard on a primary topic
    pub primary: Url,
    /// Replaces `primary` for messages on the MediumSlow channel
    #[serde(default)]
    pub medium_slow: Option<Url>,
    /// Receives messages heard on a private topic
    #[serde(default)]
    pub private: Option<Url>,
}

/// Topic prefixes that count as home traffic
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Topics {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub private: Vec<String>,
}

impl Topics {
    pub fn is_primary(&self, topic: &str) -> bool {
        self.primary.iter().any(|prefix| topic.starts_with(prefix.as_str()))
    }

    pub fn is_private(&self, topic: &str) -> bool {
        self.private.iter().any(|prefix| topic.starts_with(prefix.as_str()))
    }

    pub fn is_home(&self, topic: &str) -> bool {
        self.is_primary(topic) || self.is_private(topic)
    }

    /// Every home prefix, primary first.
    pub fn all(&self) -> Vec<String> {
        self.primary.iter().chain(&self.private).cloned().collect()
    }
}

/// Identity the webhook posts appear under
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Bot {
    pub username: String,
    pub avatar_url: String,
}

impl Default for Bot {
    fn default() -> Self {
        Bot {
            username: "Captain Hook".into(),
            avatar_url: "https://cdn.discordapp.com/avatars/1355684023615361146/af64924d6f2c32bacb64d1658739af3b.png".into(),
        }
    }
}

fn default_environment() -> String {
    "development".into()
}

fn default_node_db_path() -> PathBuf {
    "nodeDB.json".into()
}

fn default_ignore_list_path() -> PathBuf {
    "ignoreDB.json".into()
}

fn default_refresh_interval_ms() -> u64 {
    60 * 60 * 1000
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

fn default_links_base_url() -> String {
    "https://meshview.kk6vsy.com".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// `production` enables the broadcast-only filter
    #[serde(default = "default_environment")]
    pub environment: String,
    pub webhooks: Webhooks,
    #[serde(default)]
    pub topics: Topics,
    #[serde(default)]
    pub bot: Bot,
    /// Node directory file, read at startup and rewritten on every update
    #[serde(default = "default_node_db_path")]
    pub node_db_path: PathBuf,
    /// JSON array of node ids whose texts are never relayed
    #[serde(default = "default_ignore_list_path")]
    pub ignore_list_path: PathBuf,
    #[serde(default)]
    pub ignore_list_url: Option<Url>,
    /// JSON object mapping node ids (and `default`) to avatar image URLs
    #[serde(default)]
    pub avatars_url: Option<Url>,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Request timeout for webhook posts and directory refreshes
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
    /// Base of the packet and node links in the embeds
    #[serde(default = "default_links_base_url")]
    pub links_base_url: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.topics.primary.is_empty() {
            return Err(ValidationError::NoPrimaryTopics);
        }
        if self.refresh_interval_ms == 0 {
            return Err(ValidationError::ZeroRefreshInterval);
        }
        if self.webhook_timeout_ms == 0 {
            return Err(ValidationError::ZeroWebhookTimeout);
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}
