use std::sync::Arc;

use chrono::{DateTime, Utc};
use clientmon_common::types::{
    AlertRule, Client, EventSeverity, EventType, Notification, NotificationType, TriggerType,
};
use clientmon_notify::NotificationDispatcher;
use clientmon_storage::{EventLogger, MonitorStore};
use serde_json::Value;

use crate::condition;
use crate::error::Result;
use crate::payload::AlertPayload;

/// Outcome of evaluating one rule against one event.
#[derive(Debug)]
enum RuleOutcome {
    Fired(Box<Notification>),
    InCooldown,
    ConditionsNotMet,
    LostClaim,
}

/// Evaluates stored alert rules against observations and dispatches
/// notifications for the ones that fire.
pub struct AlertRuleEngine {
    store: Arc<MonitorStore>,
    dispatcher: Arc<NotificationDispatcher>,
    events: EventLogger,
}

impl AlertRuleEngine {
    pub fn new(store: Arc<MonitorStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            events: EventLogger::new(store.clone()),
            store,
            dispatcher,
        }
    }

    pub async fn evaluate_and_trigger(
        &self,
        client: &Client,
        trigger: TriggerType,
        data: &Value,
    ) -> Vec<Notification> {
        self.evaluate_and_trigger_at(client, trigger, data, Utc::now())
            .await
    }

    /// Evaluates every active rule for `trigger` that applies to `client`
    /// and returns the notifications dispatched.
    ///
    /// A failure on one rule is logged and does not stop the others.
    pub async fn evaluate_and_trigger_at(
        &self,
        client: &Client,
        trigger: TriggerType,
        data: &Value,
        now: DateTime<Utc>,
    ) -> Vec<Notification> {
        let rules = match self.store.list_active_rules_for_trigger(trigger, &client.id) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(
                    client_id = %client.id,
                    trigger = %trigger,
                    error = %e,
                    "Failed to load alert rules"
                );
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for rule in rules {
            match self.evaluate_rule(&rule, client, trigger, data, now).await {
                Ok(RuleOutcome::Fired(notification)) => fired.push(*notification),
                Ok(outcome) => {
                    tracing::debug!(
                        rule = %rule.name,
                        client_id = %client.id,
                        outcome = ?outcome,
                        "Alert rule did not fire"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        rule = %rule.name,
                        client_id = %client.id,
                        trigger = %trigger,
                        error = %e,
                        "Alert rule evaluation failed, skipping rule"
                    );
                }
            }
        }
        fired
    }

    async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        client: &Client,
        trigger: TriggerType,
        data: &Value,
        now: DateTime<Utc>,
    ) -> Result<RuleOutcome> {
        if rule.in_cooldown(now) {
            return Ok(RuleOutcome::InCooldown);
        }
        if !condition::evaluate(&rule.conditions, data)? {
            return Ok(RuleOutcome::ConditionsNotMet);
        }
        // The claim stamps last_triggered_at before dispatch, so a failed
        // dispatch still starts the cooldown.
        if !self.store.claim_alert_rule(&rule.id, now)? {
            return Ok(RuleOutcome::LostClaim);
        }

        let payload = AlertPayload::from_event(trigger, data);
        let mut notification = Notification::pending(
            clientmon_common::id::next_id(),
            payload.notification_type(),
            payload.title(&client.name),
            payload.message(&client.name),
            serde_json::to_value(&payload)?,
            now,
        );
        notification.client_id = Some(client.id.clone());
        notification.alert_rule_id = Some(rule.id.clone());

        tracing::info!(
            rule = %rule.name,
            client_id = %client.id,
            trigger = %trigger,
            notification_type = %notification.notification_type,
            "Alert rule fired"
        );
        self.events.record(
            &client.id,
            EventType::AlertTriggered,
            "alert_triggered",
            severity_for(notification.notification_type),
            format!("Alert rule '{}' fired: {}", rule.name, notification.title),
            serde_json::json!({
                "alert_rule_id": rule.id,
                "rule_name": rule.name,
                "trigger_type": trigger,
                "notification_id": notification.id,
                "data": data,
            }),
        );

        self.dispatcher
            .dispatch(&mut notification, rule, Some(&client.name))
            .await?;
        Ok(RuleOutcome::Fired(Box::new(notification)))
    }
}

fn severity_for(notification_type: NotificationType) -> EventSeverity {
    match notification_type {
        NotificationType::Info => EventSeverity::Low,
        NotificationType::Warning => EventSeverity::Medium,
        NotificationType::Alert => EventSeverity::High,
        NotificationType::Critical => EventSeverity::Critical,
    }
}
