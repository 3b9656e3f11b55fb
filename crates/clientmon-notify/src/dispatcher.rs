use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clientmon_common::types::{
    AlertRule, ChannelKind, EventSeverity, EventType, Notification, NotificationStatus,
};
use clientmon_storage::{Acknowledgement, EventLogger, MonitorStore};
use futures::future::join_all;

use crate::error::{NotifyError, Result};
use crate::registry::ChannelRegistry;
use crate::OutgoingMessage;

/// Persists notifications and fans them out to the rule's channels.
///
/// Channels are delivered concurrently, each bounded by `channel_timeout`.
/// A failing channel never prevents delivery on the others.
pub struct NotificationDispatcher {
    store: Arc<MonitorStore>,
    events: EventLogger,
    registry: ChannelRegistry,
    channel_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<MonitorStore>,
        registry: ChannelRegistry,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            events: EventLogger::new(store.clone()),
            store,
            registry,
            channel_timeout,
        }
    }

    /// Stores `notification` as pending, delivers it on every channel of
    /// `rule` and records the outcome.
    ///
    /// On return the notification is `sent` (with `sent_at` and the
    /// successful channels in `channels_sent`) or `failed`.
    pub async fn dispatch(
        &self,
        notification: &mut Notification,
        rule: &AlertRule,
        client_name: Option<&str>,
    ) -> Result<()> {
        if notification.alert_rule_id.is_none() {
            notification.alert_rule_id = Some(rule.id.clone());
        }
        notification.recipients = rule.recipients.clone();
        notification.status = NotificationStatus::Pending;
        self.store.insert_notification(notification)?;

        let resolved: Vec<(ChannelKind, Vec<String>)> = rule
            .notification_channels
            .iter()
            .map(|kind| (*kind, self.resolve_recipients(*kind, &rule.recipients)))
            .collect();

        let pending: &Notification = notification;
        let results = join_all(
            resolved
                .iter()
                .map(|(kind, recipients)| self.deliver(*kind, pending, client_name, recipients)),
        )
        .await;

        let mut delivered = BTreeSet::new();
        let mut failed = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(()) => {
                    delivered.insert(kind);
                }
                Err(e) => {
                    tracing::error!(
                        notification_id = %notification.id,
                        channel = %kind,
                        error = %e,
                        "Notification channel delivery failed"
                    );
                    failed.push(kind);
                }
            }
        }

        let now = Utc::now();
        notification.updated_at = now;
        if delivered.is_empty() {
            notification.status = NotificationStatus::Failed;
            notification.sent_at = None;
        } else {
            notification.status = NotificationStatus::Sent;
            notification.sent_at = Some(now);
        }
        notification.channels_sent = delivered;
        self.store.finalize_notification(notification)?;

        tracing::info!(
            notification_id = %notification.id,
            rule = %rule.name,
            status = %notification.status,
            sent = ?notification.channels_sent,
            failed = ?failed,
            "Notification dispatched"
        );
        self.record_outcome(notification, &failed);
        Ok(())
    }

    /// Acknowledges a notification once; repeated calls leave the first
    /// acknowledgment in place.
    pub fn acknowledge(
        &self,
        notification_id: &str,
        acknowledged_by: &str,
        note: Option<&str>,
    ) -> Result<Acknowledgement> {
        let outcome = self.store.acknowledge_notification(
            notification_id,
            acknowledged_by,
            note,
            Utc::now(),
        )?;
        match outcome {
            Acknowledgement::Acknowledged => {
                tracing::info!(notification_id, acknowledged_by, "Notification acknowledged")
            }
            Acknowledgement::AlreadyAcknowledged => {
                tracing::debug!(notification_id, "Notification was already acknowledged")
            }
        }
        Ok(outcome)
    }

    async fn deliver(
        &self,
        kind: ChannelKind,
        notification: &Notification,
        client_name: Option<&str>,
        recipients: &[String],
    ) -> (ChannelKind, Result<()>) {
        let Some(channel) = self.registry.get(kind) else {
            return (kind, Err(NotifyError::ChannelNotConfigured(kind)));
        };
        let message = OutgoingMessage {
            notification,
            client_name,
            recipients,
        };
        match tokio::time::timeout(self.channel_timeout, channel.send(&message)).await {
            Ok(result) => (kind, result),
            Err(_) => (
                kind,
                Err(NotifyError::Timeout {
                    channel: kind,
                    secs: self.channel_timeout.as_secs(),
                }),
            ),
        }
    }

    /// Picks the recipients meaningful to `kind` out of a rule's mixed list:
    /// email addresses (or user ids with an address) for email, existing
    /// user ids for in-app, `#channel`/`@user` for Slack and URLs for webhooks.
    fn resolve_recipients(&self, kind: ChannelKind, recipients: &[String]) -> Vec<String> {
        let mut resolved = Vec::new();
        for recipient in recipients {
            let recipient = recipient.trim();
            match kind {
                ChannelKind::Email if recipient.contains('@') && !is_slack_target(recipient) => {
                    resolved.push(recipient.to_string())
                }
                ChannelKind::Email if is_user_id(recipient) => {
                    if let Some(email) = self.lookup_user(recipient).and_then(|u| u.email) {
                        resolved.push(email);
                    }
                }
                ChannelKind::InApp if is_user_id(recipient) => {
                    if self.lookup_user(recipient).is_some() {
                        resolved.push(recipient.to_string());
                    }
                }
                ChannelKind::Slack if is_slack_target(recipient) => {
                    resolved.push(recipient.to_string())
                }
                ChannelKind::Webhook if is_url(recipient) => resolved.push(recipient.to_string()),
                _ => {}
            }
        }
        let mut seen = BTreeSet::new();
        resolved.retain(|r| seen.insert(r.clone()));
        resolved
    }

    fn lookup_user(&self, user_id: &str) -> Option<clientmon_common::types::User> {
        match self.store.get_user(user_id) {
            Ok(user) => {
                if user.is_none() {
                    tracing::debug!(user_id, "Recipient user not found");
                }
                user
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to resolve recipient user");
                None
            }
        }
    }

    fn record_outcome(&self, notification: &Notification, failed: &[ChannelKind]) {
        let Some(client_id) = notification.client_id.as_deref() else {
            return;
        };
        let metadata = serde_json::json!({
            "notification_id": notification.id,
            "alert_rule_id": notification.alert_rule_id,
            "channels_sent": notification.channels_sent,
            "channels_failed": failed,
        });
        let (event_type, name, severity, description) = match notification.status {
            NotificationStatus::Sent => (
                EventType::NotificationSent,
                "notification_sent",
                EventSeverity::Low,
                format!("Notification '{}' sent", notification.title),
            ),
            _ => (
                EventType::NotificationFailed,
                "notification_failed",
                EventSeverity::Medium,
                format!("Notification '{}' could not be delivered", notification.title),
            ),
        };
        self.events
            .record(client_id, event_type, name, severity, description, metadata);
    }
}

fn is_slack_target(s: &str) -> bool {
    s.starts_with('#') || s.starts_with('@')
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn is_user_id(s: &str) -> bool {
    !s.is_empty() && !s.contains('@') && !s.starts_with('#') && !is_url(s)
}
