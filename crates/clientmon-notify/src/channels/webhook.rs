use async_trait::async_trait;
use clientmon_common::types::ChannelKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{any_succeeded, post_json_with_retry};
use crate::error::{NotifyError, Result};
use crate::utils::redact_sensitive_json;
use crate::{NotificationChannel, OutgoingMessage};

/// `[notify.webhook]` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Default target when a rule names no webhook URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Optional body with `{{title}}`, `{{message}}`, `{{type}}`,
    /// `{{client_id}}`, `{{client_name}}` and `{{data}}` placeholders.
    #[serde(default)]
    pub body_template: Option<String>,
}

pub struct WebhookChannel {
    client: reqwest::Client,
    default_url: Option<String>,
    body_template: Option<String>,
}

impl WebhookChannel {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_url: config.url.clone(),
            body_template: config.body_template.clone(),
        }
    }

    fn render_body(&self, message: &OutgoingMessage<'_>) -> Result<Value> {
        let n = message.notification;
        let data = redact_sensitive_json(&n.data);
        let client_name = message.client_name.unwrap_or_default();
        if let Some(template) = &self.body_template {
            let rendered = template
                .replace("{{title}}", &escape_json(&n.title))
                .replace("{{message}}", &escape_json(&n.message))
                .replace("{{type}}", n.notification_type.as_str())
                .replace("{{client_id}}", &escape_json(n.client_id.as_deref().unwrap_or_default()))
                .replace("{{client_name}}", &escape_json(client_name))
                .replace("{{data}}", &data.to_string());
            return serde_json::from_str(&rendered).map_err(|e| {
                NotifyError::InvalidConfig(format!("webhook body_template is not valid JSON: {e}"))
            });
        }
        Ok(serde_json::json!({
            "id": n.id,
            "title": n.title,
            "message": n.message,
            "type": n.notification_type,
            "client_id": n.client_id,
            "client_name": message.client_name,
            "alert_rule_id": n.alert_rule_id,
            "data": data,
            "created_at": n.created_at.to_rfc3339(),
        }))
    }
}

/// Escapes a string for embedding inside a JSON string literal of a template.
fn escape_json(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, message: &OutgoingMessage<'_>) -> Result<()> {
        let mut targets: Vec<String> = message.recipients.to_vec();
        if targets.is_empty() {
            targets.extend(self.default_url.clone());
        }
        if targets.is_empty() {
            return Err(NotifyError::NoRecipients(ChannelKind::Webhook));
        }

        let body = self.render_body(message)?;
        let mut outcomes = Vec::with_capacity(targets.len());
        for url in targets {
            let outcome = post_json_with_retry(&self.client, "webhook", &url, &body).await;
            if outcome.is_ok() {
                tracing::debug!(url = %url, notification_id = %message.notification.id, "Webhook delivered");
            }
            outcomes.push((url, outcome));
        }
        any_succeeded(ChannelKind::Webhook, outcomes)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_support::{self, Endpoint};
    use chrono::Utc;
    use clientmon_common::types::{Notification, NotificationType};

    fn notification() -> Notification {
        let mut n = Notification::pending(
            "n-1".to_string(),
            NotificationType::Critical,
            "Health \"down\"".to_string(),
            "3 failures".to_string(),
            serde_json::json!({"consecutive_failures": 3, "client_secret": "x"}),
            Utc::now(),
        );
        n.client_id = Some("c-1".to_string());
        n
    }

    #[test]
    fn default_body_carries_core_fields_and_redacts() {
        let channel = WebhookChannel::new(&WebhookConfig {
            url: None,
            body_template: None,
        });
        let n = notification();
        let msg = OutgoingMessage {
            notification: &n,
            client_name: Some("Web App"),
            recipients: &[],
        };
        let body = channel.render_body(&msg).unwrap();
        assert_eq!(body["title"], "Health \"down\"");
        assert_eq!(body["type"], "critical");
        assert_eq!(body["client_name"], "Web App");
        assert_eq!(body["data"]["consecutive_failures"], 3);
        assert_eq!(body["data"]["client_secret"], "***");
    }

    fn local_channel(default_url: Option<String>) -> WebhookChannel {
        WebhookChannel {
            client: test_support::client(),
            default_url,
            body_template: None,
        }
    }

    #[tokio::test]
    async fn delivered_when_one_of_two_urls_answers() {
        let live = Endpoint::start(vec![200]).await.unwrap();
        let dead = test_support::dead_url().await.unwrap();
        let n = notification();
        let recipients = vec![dead, live.url()];
        let msg = OutgoingMessage {
            notification: &n,
            client_name: Some("Web App"),
            recipients: &recipients,
        };

        local_channel(None).send(&msg).await.unwrap();
        assert_eq!(live.hits(), 1);
        assert_eq!(live.bodies()[0]["id"], "n-1");
        assert_eq!(live.bodies()[0]["data"]["client_secret"], "***");
    }

    #[tokio::test]
    async fn failing_default_url_fails_the_channel() {
        let endpoint = Endpoint::start(vec![500]).await.unwrap();
        let n = notification();
        let msg = OutgoingMessage {
            notification: &n,
            client_name: None,
            recipients: &[],
        };

        let err = local_channel(Some(endpoint.url())).send(&msg).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::AllRecipientsFailed {
                channel: ChannelKind::Webhook,
                attempted: 1,
                ..
            }
        ));
        assert_eq!(endpoint.hits(), 3);
    }

    #[tokio::test]
    async fn no_target_at_all_is_an_error() {
        let n = notification();
        let msg = OutgoingMessage {
            notification: &n,
            client_name: None,
            recipients: &[],
        };
        let err = local_channel(None).send(&msg).await.unwrap_err();
        assert!(matches!(err, NotifyError::NoRecipients(ChannelKind::Webhook)));
    }

    #[test]
    fn template_body_is_escaped() {
        let channel = WebhookChannel::new(&WebhookConfig {
            url: None,
            body_template: Some(
                r#"{"text": "{{title}}: {{message}}", "severity": "{{type}}", "extra": {{data}}}"#
                    .to_string(),
            ),
        });
        let n = notification();
        let msg = OutgoingMessage {
            notification: &n,
            client_name: None,
            recipients: &[],
        };
        let body = channel.render_body(&msg).unwrap();
        assert_eq!(body["text"], "Health \"down\": 3 failures");
        assert_eq!(body["severity"], "critical");
        assert_eq!(body["extra"]["consecutive_failures"], 3);
    }
}
