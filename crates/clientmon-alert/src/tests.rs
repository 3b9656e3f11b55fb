use crate::AlertRuleEngine;
use chrono::{Duration, Utc};
use clientmon_common::types::{
    ChannelKind, Client, CompareOp, Condition, EventType, NewAlertRule, NewClient,
    NotificationStatus, NotificationType, TriggerType, MAX_COOLDOWN_MINUTES,
};
use clientmon_notify::{ChannelRegistry, NotificationDispatcher};
use clientmon_storage::MonitorStore;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tempfile::TempDir;

/// The in-app channel is real, so delivery succeeds exactly when the rule's
/// recipients are known users.
struct Fixture {
    _dir: TempDir,
    store: Arc<MonitorStore>,
    engine: AlertRuleEngine,
    client: Client,
    user_id: String,
}

fn setup() -> Fixture {
    clientmon_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MonitorStore::open(dir.path(), "alert.db").unwrap());
    let registry = ChannelRegistry::from_config(&Default::default(), store.clone()).unwrap();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        registry,
        StdDuration::from_secs(5),
    ));
    let engine = AlertRuleEngine::new(store.clone(), dispatcher);
    let client = store
        .insert_client(&NewClient::new("web-app", "Web App").with_health_check("http://h", 60))
        .unwrap();
    let user = store.insert_user("oncall", None).unwrap();
    Fixture {
        _dir: dir,
        store,
        engine,
        client,
        user_id: user.id,
    }
}

fn failure_rule(name: &str, recipient: &str) -> NewAlertRule {
    NewAlertRule {
        name: name.to_string(),
        description: Some("Three strikes".to_string()),
        client_id: None,
        trigger_type: TriggerType::HealthCheckFailure,
        conditions: vec![Condition::new(
            "consecutive_failures",
            CompareOp::GreaterEqual,
            3.0,
        )],
        notification_channels: BTreeSet::from([ChannelKind::InApp]),
        recipients: vec![recipient.to_string()],
        is_active: true,
        cooldown_minutes: 60,
    }
}

#[tokio::test]
async fn rule_respects_sixty_minute_cooldown() {
    let f = setup();
    let rule = f
        .store
        .insert_alert_rule(&failure_rule("three-strikes", &f.user_id))
        .unwrap();
    let data = json!({"consecutive_failures": 3, "status_code": 500});
    let t = Utc::now();

    let fired = f
        .engine
        .evaluate_and_trigger_at(&f.client, TriggerType::HealthCheckFailure, &data, t)
        .await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].notification_type, NotificationType::Critical);
    assert_eq!(fired[0].status, NotificationStatus::Sent);
    assert_eq!(fired[0].alert_rule_id.as_deref(), Some(rule.id.as_str()));
    assert_eq!(fired[0].data["consecutive_failures"], 3);

    let again = f
        .engine
        .evaluate_and_trigger_at(
            &f.client,
            TriggerType::HealthCheckFailure,
            &data,
            t + Duration::minutes(59),
        )
        .await;
    assert!(again.is_empty());

    let later = f
        .engine
        .evaluate_and_trigger_at(
            &f.client,
            TriggerType::HealthCheckFailure,
            &data,
            t + Duration::minutes(60),
        )
        .await;
    assert_eq!(later.len(), 1);
    assert_eq!(f.store.list_in_app_messages(&f.user_id, true).unwrap().len(), 2);
}

#[tokio::test]
async fn year_long_cooldown_holds_and_longer_is_refused() {
    let f = setup();
    let too_long = NewAlertRule {
        cooldown_minutes: 10_000_000_000_000,
        ..failure_rule("forever", &f.user_id)
    };
    assert!(f.store.insert_alert_rule(&too_long).is_err());

    f.store
        .insert_alert_rule(&NewAlertRule {
            cooldown_minutes: MAX_COOLDOWN_MINUTES,
            ..failure_rule("yearly", &f.user_id)
        })
        .unwrap();
    let data = json!({"consecutive_failures": 3});
    let t = Utc::now();

    let first = f
        .engine
        .evaluate_and_trigger_at(&f.client, TriggerType::HealthCheckFailure, &data, t)
        .await;
    assert_eq!(first.len(), 1);

    for later in [Duration::minutes(1), Duration::minutes(MAX_COOLDOWN_MINUTES - 1)] {
        let fired = f
            .engine
            .evaluate_and_trigger_at(&f.client, TriggerType::HealthCheckFailure, &data, t + later)
            .await;
        assert!(fired.is_empty());
    }

    let after = f
        .engine
        .evaluate_and_trigger_at(
            &f.client,
            TriggerType::HealthCheckFailure,
            &data,
            t + Duration::minutes(MAX_COOLDOWN_MINUTES),
        )
        .await;
    assert_eq!(after.len(), 1);
}

#[tokio::test]
async fn unmet_conditions_do_not_claim_cooldown() {
    let f = setup();
    let rule = f
        .store
        .insert_alert_rule(&failure_rule("three-strikes", &f.user_id))
        .unwrap();

    let fired = f
        .engine
        .evaluate_and_trigger(
            &f.client,
            TriggerType::HealthCheckFailure,
            &json!({"consecutive_failures": 2}),
        )
        .await;
    assert!(fired.is_empty());
    let reloaded = f.store.get_alert_rule(&rule.id).unwrap().unwrap();
    assert!(reloaded.last_triggered_at.is_none());

    let other_trigger = f
        .engine
        .evaluate_and_trigger(
            &f.client,
            TriggerType::HighErrorRate,
            &json!({"consecutive_failures": 9}),
        )
        .await;
    assert!(other_trigger.is_empty());
}

#[tokio::test]
async fn malformed_rule_data_skips_only_that_rule() {
    let f = setup();
    let mut broken = failure_rule("needs-latency", &f.user_id);
    broken.conditions = vec![Condition::new("latency_ms", CompareOp::GreaterThan, 100.0)];
    f.store.insert_alert_rule(&broken).unwrap();
    let mut catch_all = failure_rule("any-failure", &f.user_id);
    catch_all.conditions.clear();
    f.store.insert_alert_rule(&catch_all).unwrap();

    let fired = f
        .engine
        .evaluate_and_trigger(
            &f.client,
            TriggerType::HealthCheckFailure,
            &json!({"consecutive_failures": 1}),
        )
        .await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].title, "Health check failing for Web App");
}

#[tokio::test]
async fn failed_dispatch_still_stamps_cooldown() {
    let f = setup();
    let rule = f
        .store
        .insert_alert_rule(&failure_rule("unknown-recipient", "nobody"))
        .unwrap();
    let data = json!({"consecutive_failures": 4});
    let t = Utc::now();

    let fired = f
        .engine
        .evaluate_and_trigger_at(&f.client, TriggerType::HealthCheckFailure, &data, t)
        .await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].status, NotificationStatus::Failed);
    assert!(fired[0].sent_at.is_none());

    let reloaded = f.store.get_alert_rule(&rule.id).unwrap().unwrap();
    assert_eq!(
        reloaded.last_triggered_at.map(|ts| ts.timestamp_millis()),
        Some(t.timestamp_millis())
    );
    let retry = f
        .engine
        .evaluate_and_trigger_at(
            &f.client,
            TriggerType::HealthCheckFailure,
            &data,
            t + Duration::minutes(1),
        )
        .await;
    assert!(retry.is_empty());
}

#[tokio::test]
async fn scoped_rules_only_match_their_client() {
    let f = setup();
    let mut scoped = failure_rule("other-client-only", &f.user_id);
    scoped.client_id = Some("someone-else".to_string());
    f.store.insert_alert_rule(&scoped).unwrap();

    let fired = f
        .engine
        .evaluate_and_trigger(
            &f.client,
            TriggerType::HealthCheckFailure,
            &json!({"consecutive_failures": 10}),
        )
        .await;
    assert!(fired.is_empty());
}

#[tokio::test]
async fn firing_is_recorded_in_event_log() {
    let f = setup();
    f.store
        .insert_alert_rule(&failure_rule("three-strikes", &f.user_id))
        .unwrap();
    f.engine
        .evaluate_and_trigger(
            &f.client,
            TriggerType::HealthCheckFailure,
            &json!({"consecutive_failures": 3}),
        )
        .await;

    let kinds: Vec<EventType> = f
        .store
        .list_client_events(&f.client.id, 10)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(kinds.contains(&EventType::AlertTriggered));
    assert!(kinds.contains(&EventType::NotificationSent));
}
