use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::Discord;
use crate::{AlertEvent, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;

#[derive(Debug, Clone)]
pub struct DiscordManager {
    client: Client,
}

impl DiscordManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn build_alert_embed(&self, user_id: &UserId, alert: &AlertEvent) -> Embed {
        let outcome = match (alert.status_code, &alert.error) {
            (Some(code), _) => format!("HTTP {code}"),
            (None, Some(error)) => format!("no response ({error})"),
            (None, None) => "no response".to_string(),
        };

        Embed {
            title: Some("🔴 URL Down".to_string()),
            description: Some(format!(
                "**{}** failed {} consecutive checks",
                alert.url.url, alert.url.threshold
            )),
            color: Some(RED),
            fields: vec![
                EmbedField {
                    name: "Last Result".to_string(),
                    value: outcome,
                    inline: true,
                },
                EmbedField {
                    name: "Threshold".to_string(),
                    value: alert.url.threshold.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Successful Checks".to_string(),
                    value: alert.url.succeeded.to_string(),
                    inline: true,
                },
            ],
            footer: Some(EmbedFooter {
                text: format!("User: {user_id}"),
            }),
            timestamp: Some(alert.requested_at.to_rfc3339()),
        }
    }

    /// Post a message to a Discord webhook; returns whether Discord accepted it
    #[instrument(skip(self, discord, message))]
    pub async fn send_message(&self, discord: &Discord, message: &Message) -> bool {
        match self.client.post(&discord.url).json(message).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent Discord message");
                    true
                } else {
                    error!("Discord message failed with status: {}", response.status());
                    if let Ok(error_text) = response.text().await {
                        error!("Discord API error response: {}", error_text);
                    }
                    false
                }
            }
            Err(e) => {
                error!("Failed to send Discord message: {}", e);
                false
            }
        }
    }
}
