//! Discord webhook payloads and delivery.

use crate::errors::WebhookError;
use async_trait::async_trait;
use serde::Serialize;
use url::Url;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WebhookMessage {
    pub username: String,
    pub avatar_url: String,
    pub embeds: Vec<Embed>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Embed {
    pub url: String,
    pub color: u32,
    /// RFC 3339
    pub timestamp: String,
    pub author: EmbedAuthor,
    pub title: String,
    pub description: String,
    pub fields: Vec<EmbedField>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: String,
    pub icon_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &Url, message: &WebhookMessage) -> Result<(), WebhookError>;
}

/// Posts messages to Discord webhook URLs.
#[derive(Clone, Debug, Default)]
pub struct DiscordWebhook {
    client: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new(client: reqwest::Client) -> Self {
        DiscordWebhook { client }
    }
}

#[async_trait]
impl WebhookSender for DiscordWebhook {
    async fn send(&self, url: &Url, message: &WebhookMessage) -> Result<(), WebhookError> {
        let response = self.client.post(url.clone()).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status));
        }
        Ok(())
    }
}
