use async_trait::async_trait;
use clientmon_common::types::{ChannelKind, NotificationType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{any_succeeded, post_json_with_retry};
use crate::error::Result;
use crate::utils::{format_data, redact_sensitive_json};
use crate::{NotificationChannel, OutgoingMessage};

/// `[notify.slack]` settings for an incoming webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    /// Channel used when a rule names none, e.g. `#ops`.
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_username() -> String {
    "clientmon".to_string()
}

pub struct SlackChannel {
    client: reqwest::Client,
    webhook_url: String,
    default_channel: Option<String>,
    username: String,
}

impl SlackChannel {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: config.webhook_url.clone(),
            default_channel: config.channel.clone(),
            username: config.username.clone(),
        }
    }

    fn color(notification_type: NotificationType) -> &'static str {
        match notification_type {
            NotificationType::Info => "#439FE0",
            NotificationType::Warning => "warning",
            NotificationType::Alert => "#FF8C00",
            NotificationType::Critical => "danger",
        }
    }

    fn payload(&self, message: &OutgoingMessage<'_>, channel: Option<&str>) -> Value {
        let n = message.notification;
        let client = message
            .client_name
            .or(n.client_id.as_deref())
            .unwrap_or("-");
        let details = format_data(&redact_sensitive_json(&n.data));
        let mut fields = vec![
            serde_json::json!({"title": "Client", "value": client, "short": true}),
            serde_json::json!({"title": "Type", "value": n.notification_type.as_str(), "short": true}),
        ];
        if !details.is_empty() {
            fields.push(serde_json::json!({"title": "Details", "value": details, "short": false}));
        }
        let mut payload = serde_json::json!({
            "username": self.username,
            "text": format!("[{}] {}", n.notification_type.as_str().to_uppercase(), n.title),
            "attachments": [{
                "color": Self::color(n.notification_type),
                "title": n.title,
                "text": n.message,
                "fields": fields,
                "ts": n.created_at.timestamp(),
            }],
        });
        if let Some(channel) = channel {
            payload["channel"] = Value::String(channel.to_string());
        }
        payload
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    async fn send(&self, message: &OutgoingMessage<'_>) -> Result<()> {
        let mut channels: Vec<Option<String>> =
            message.recipients.iter().cloned().map(Some).collect();
        if channels.is_empty() {
            channels.push(self.default_channel.clone());
        }

        let mut outcomes = Vec::with_capacity(channels.len());
        for channel in channels {
            let body = self.payload(message, channel.as_deref());
            let outcome = post_json_with_retry(&self.client, "slack", &self.webhook_url, &body).await;
            outcomes.push((channel.unwrap_or_else(|| "(default)".to_string()), outcome));
        }
        any_succeeded(ChannelKind::Slack, outcomes)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }
}
