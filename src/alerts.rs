use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument};

use crate::config::{Alert, Webhook};
use crate::discord::{DiscordManager, MessageBuilder};
use crate::{AlertEvent, UserId};

/// Delivers alert events to the configured outside channel
///
/// Delivery is best effort. The alert log in the store is the durable record,
/// so a failed delivery is logged and never retried.
#[derive(Debug, Clone)]
pub struct AlertManager {
    client: Client,
    target: Alert,
    discord_manager: DiscordManager,
}

impl AlertManager {
    pub fn new(target: Alert) -> Self {
        let client = Client::new();

        Self {
            discord_manager: DiscordManager::new(client.clone()),
            client,
            target,
        }
    }

    /// Send one alert; returns whether the receiver accepted it
    #[instrument(skip(self, alert), fields(url = %alert.url.url))]
    pub async fn send_alert(&self, user_id: &UserId, alert: &AlertEvent) -> bool {
        match &self.target {
            Alert::Discord(discord) => {
                let embed = self.discord_manager.build_alert_embed(user_id, alert);
                let mut message_builder = MessageBuilder::new().add_embed(embed);
                if let Some(mention) = &discord.user_id {
                    message_builder = message_builder
                        .content(format!("🔴 `{}` is down <@{mention}>", alert.url.url));
                }

                self.discord_manager
                    .send_message(discord, &message_builder.build())
                    .await
            }
            Alert::Webhook(webhook) => self.send_webhook_alert(webhook, user_id, alert).await,
        }
    }

    #[instrument(skip(self, webhook, alert))]
    async fn send_webhook_alert(
        &self,
        webhook: &Webhook,
        user_id: &UserId,
        alert: &AlertEvent,
    ) -> bool {
        let payload = json!({
            "message": format_alert_message(alert),
            "user_id": user_id,
            "url": alert.url.url,
            "threshold": alert.url.threshold,
            "status_code": alert.status_code,
            "error": alert.error,
            "timestamp": alert.requested_at.to_rfc3339()
        });

        match self.client.post(&webhook.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook alert");
                    true
                } else {
                    error!("Webhook alert failed with status: {}", response.status());
                    false
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
                false
            }
        }
    }
}

fn format_alert_message(alert: &AlertEvent) -> String {
    let cause = match (alert.status_code, &alert.error) {
        (Some(code), _) => format!("status {code}"),
        (None, Some(error)) => error.clone(),
        (None, None) => "no response".to_string(),
    };

    format!(
        "🔴 **URL Down**: `{}` failed {} consecutive checks ({})",
        alert.url.url, alert.url.threshold, cause
    )
}
