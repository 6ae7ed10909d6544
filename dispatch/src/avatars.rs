use crate::errors::DirectoryError;
use crate::metrics_defs::DIRECTORY_SIZE;
use crate::refresh::{Refresh, fetch_json};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared::gauge;
use std::collections::HashMap;
use url::Url;

pub const DEFAULT_AVATAR: &str = "https://cdn.discordapp.com/embed/avatars/0.png";

const DEFAULT_KEY: &str = "default";

/// Avatar image per node, with a `default` entry for everyone else.
#[derive(Debug)]
pub struct AvatarDirectory {
    url: Option<Url>,
    avatars: RwLock<HashMap<String, String>>,
}

impl AvatarDirectory {
    pub fn new(url: Option<Url>) -> Self {
        AvatarDirectory {
            url,
            avatars: RwLock::new(HashMap::from([(
                DEFAULT_KEY.to_string(),
                DEFAULT_AVATAR.to_string(),
            )])),
        }
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn avatar_for(&self, node_hex: &str) -> String {
        let avatars = self.avatars.read();
        avatars
            .get(node_hex)
            .or_else(|| avatars.get(DEFAULT_KEY))
            .cloned()
            .unwrap_or_else(|| DEFAULT_AVATAR.to_string())
    }

    pub fn len(&self) -> usize {
        self.avatars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.read().is_empty()
    }

    pub fn replace(&self, avatars: HashMap<String, String>) {
        gauge!(DIRECTORY_SIZE, "directory" => "avatars").set(avatars.len() as f64);
        *self.avatars.write() = avatars;
    }
}

impl Default for AvatarDirectory {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Refresh for AvatarDirectory {
    fn name(&self) -> &'static str {
        "avatars"
    }

    async fn refresh(&self, client: &reqwest::Client) -> Result<usize, DirectoryError> {
        let Some(url) = &self.url else {
            return Ok(self.len());
        };
        let avatars: HashMap<String, String> = fetch_json(client, url).await?;
        self.replace(avatars);
        Ok(self.len())
    }
}
