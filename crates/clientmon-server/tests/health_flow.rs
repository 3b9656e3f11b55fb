mod common;

use chrono::{Duration, Utc};
use clientmon_common::types::{
    EventType, HealthStatus, NewClient, NotificationStatus, NotificationType, TriggerType,
};
use clientmon_server::health::{ProbeStatus, SweepMode, SweepReport};
use clientmon_storage::HealthUpdate;
use common::{at_least, build_test_context, build_test_context_with, closed_port_url, HealthTarget};

#[tokio::test]
async fn due_client_recovers_then_alerts_once_after_three_failures() {
    let ctx = build_test_context().unwrap();
    let target = HealthTarget::start(200).await.unwrap();
    let client = ctx.add_client("web-app", &target.url(), 300);
    let now = Utc::now();
    ctx.store()
        .record_health_result(
            &client.id,
            &HealthUpdate {
                status: HealthStatus::Healthy,
                error_message: None,
                checked_at: now - Duration::seconds(400),
            },
        )
        .unwrap();
    let rule = ctx.add_rule(
        "three-strikes",
        TriggerType::HealthCheckFailure,
        vec![at_least("consecutive_failures", 3.0)],
        60,
    );

    let due = ctx.store().query_clients_due_for_check(now).unwrap();
    assert_eq!(due.len(), 1);

    let scheduler = ctx.state.scheduler();
    let report = scheduler.sweep(SweepMode::Due).await.unwrap();
    assert_eq!(report.healthy, 1);
    let healthy = ctx.reload(&client);
    assert_eq!(healthy.health_status, HealthStatus::Healthy);
    assert_eq!(healthy.health_check_failures, 0);
    assert!(healthy.last_error_message.is_none());

    // Just checked, so the next due-only sweep has nothing to do.
    assert_eq!(
        scheduler.sweep(SweepMode::Due).await.unwrap(),
        SweepReport::default()
    );

    target.respond_with(500);
    for _ in 0..3 {
        let report = scheduler.sweep(SweepMode::ForceAll).await.unwrap();
        assert_eq!(report.unhealthy, 1);
    }
    let failing = ctx.reload(&client);
    assert_eq!(failing.health_status, HealthStatus::Unhealthy);
    assert_eq!(failing.health_check_failures, 3);
    assert!(failing
        .last_error_message
        .as_deref()
        .is_some_and(|m| m.contains("500")));

    let fired = ctx.notifications_for_rule(&rule);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].notification_type, NotificationType::Critical);
    assert_eq!(fired[0].status, NotificationStatus::Sent);
    assert_eq!(fired[0].data["consecutive_failures"], 3);

    // A fourth failure is inside the cooldown.
    scheduler.sweep(SweepMode::ForceAll).await.unwrap();
    assert_eq!(ctx.reload(&client).health_check_failures, 4);
    assert_eq!(ctx.notifications_for_rule(&rule).len(), 1);
    assert_eq!(
        ctx.store().list_in_app_messages(&ctx.oncall, true).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn recovery_is_logged_with_previous_failure_count() {
    let ctx = build_test_context().unwrap();
    let target = HealthTarget::start(503).await.unwrap();
    let client = ctx.add_client("api", &target.url(), 60);

    let first = ctx.state.checker.probe(&client).await;
    assert_eq!(first.status, ProbeStatus::Unhealthy);
    assert_eq!(first.status_code, Some(503));
    assert_eq!(first.consecutive_failures, 1);

    target.respond_with(204);
    let second = ctx.state.checker.probe(&ctx.reload(&client)).await;
    assert_eq!(second.status, ProbeStatus::Healthy);
    assert_eq!(second.consecutive_failures, 0);

    let events = ctx.store().list_client_events(&client.id, 10).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::HealthUp);
    assert_eq!(events[0].metadata["recovered_after_failures"], 1);
    assert_eq!(events[0].metadata["status_code"], 204);
    assert_eq!(events[1].event_type, EventType::HealthDown);
    assert_eq!(events[1].metadata["url"], target.url());
}

#[tokio::test]
async fn transport_fault_is_an_error_without_status_code() {
    let ctx = build_test_context().unwrap();
    let url = closed_port_url().await.unwrap();
    let client = ctx.add_client("offline", &url, 60);

    let outcome = ctx.state.checker.probe(&client).await;
    assert_eq!(outcome.status, ProbeStatus::Error);
    assert!(outcome.status_code.is_none());
    assert!(!outcome.message.is_empty());

    let stored = ctx.reload(&client);
    assert_eq!(stored.health_status, HealthStatus::Error);
    assert_eq!(stored.health_check_failures, 1);
    assert_eq!(stored.last_error_message.as_deref(), Some(outcome.message.as_str()));
    assert_eq!(
        ctx.store().list_client_events(&client.id, 10).unwrap()[0].event_type,
        EventType::ErrorOccurred
    );
}

#[tokio::test]
async fn disabled_client_probe_writes_nothing() {
    let ctx = build_test_context().unwrap();
    let client = ctx
        .store()
        .insert_client(&NewClient::new("quiet", "Quiet"))
        .unwrap();

    let outcome = ctx.state.checker.probe(&client).await;
    assert_eq!(outcome.status, ProbeStatus::Disabled);

    let stored = ctx.reload(&client);
    assert!(stored.last_health_check_at.is_none());
    assert_eq!(stored.health_status, HealthStatus::Unknown);
    assert!(ctx.store().list_client_events(&client.id, 10).unwrap().is_empty());

    let report = ctx
        .state
        .scheduler()
        .sweep(SweepMode::Single("quiet".to_string()))
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.checked, 0);
}

#[tokio::test]
async fn single_mode_resolves_oauth_client_id_and_rejects_unknown() {
    let ctx = build_test_context().unwrap();
    let target = HealthTarget::start(200).await.unwrap();
    let checked = ctx.add_client("checked", &target.url(), 3600);
    let untouched = ctx.add_client("untouched", &target.url(), 3600);

    let scheduler = ctx.state.scheduler();
    let report = scheduler
        .sweep(SweepMode::Single("checked".to_string()))
        .await
        .unwrap();
    assert_eq!(report.healthy, 1);
    assert!(ctx.reload(&checked).last_health_check_at.is_some());
    assert!(ctx.reload(&untouched).last_health_check_at.is_none());

    assert!(scheduler
        .sweep(SweepMode::Single("missing".to_string()))
        .await
        .is_err());
}

#[tokio::test]
async fn pooled_sweep_checks_every_client() {
    let ctx = build_test_context_with(|config| config.health_check.max_concurrent = 3).unwrap();
    let target = HealthTarget::start(200).await.unwrap();
    let clients: Vec<_> = (0..5)
        .map(|i| ctx.add_client(&format!("client-{i}"), &target.url(), 60))
        .collect();

    let report = ctx.state.scheduler().sweep(SweepMode::Due).await.unwrap();
    assert_eq!(report.checked, 5);
    assert_eq!(report.healthy, 5);
    for client in &clients {
        assert_eq!(ctx.reload(client).health_status, HealthStatus::Healthy);
    }
}

#[tokio::test]
async fn slow_responses_raise_response_time_alerts() {
    let ctx = build_test_context().unwrap();
    let target = HealthTarget::start(200).await.unwrap();
    let client = ctx.add_client("measured", &target.url(), 60);
    let rule = ctx.add_rule(
        "any-latency",
        TriggerType::ResponseTimeThreshold,
        vec![at_least("response_time_ms", 0.0)],
        60,
    );

    ctx.state
        .scheduler()
        .sweep(SweepMode::Single(client.id.clone()))
        .await
        .unwrap();

    let fired = ctx.notifications_for_rule(&rule);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].notification_type, NotificationType::Warning);
    assert!(fired[0].data["response_time_ms"].as_f64().is_some());
}
