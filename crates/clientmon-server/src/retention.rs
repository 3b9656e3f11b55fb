use chrono::{DateTime, Duration, Utc};
use clientmon_storage::{MonitorStore, Result};
use serde::Serialize;

/// Rows removed (or, for a dry run, that would be removed) by one cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub cutoff: DateTime<Utc>,
    pub client_events: u64,
    pub usage_records: u64,
    pub acknowledged_notifications: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.client_events + self.usage_records + self.acknowledged_notifications
    }
}

pub fn cleanup(store: &MonitorStore, retention_days: u32, dry_run: bool) -> Result<CleanupReport> {
    cleanup_at(store, retention_days, dry_run, Utc::now())
}

/// Purges client events, usage rows and acknowledged notifications older
/// than `retention_days` before `now`. Unacknowledged notifications are kept
/// whatever their age.
pub fn cleanup_at(
    store: &MonitorStore,
    retention_days: u32,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<CleanupReport> {
    let cutoff = now - Duration::days(i64::from(retention_days));
    let cutoff_date = cutoff.date_naive();

    let report = if dry_run {
        CleanupReport {
            dry_run,
            cutoff,
            client_events: store.count_events_before(cutoff)?,
            usage_records: store.count_usage_before(cutoff_date)?,
            acknowledged_notifications: store.count_acknowledged_before(cutoff)?,
        }
    } else {
        CleanupReport {
            dry_run,
            cutoff,
            client_events: store.delete_events_before(cutoff)?,
            usage_records: store.delete_usage_before(cutoff_date)?,
            acknowledged_notifications: store.delete_acknowledged_before(cutoff)?,
        }
    };

    tracing::info!(
        dry_run,
        retention_days,
        cutoff = %cutoff,
        client_events = report.client_events,
        usage_records = report.usage_records,
        acknowledged_notifications = report.acknowledged_notifications,
        "Retention cleanup finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clientmon_common::types::{
        EventSeverity, EventType, NewClient, NewClientEvent, Notification, NotificationType,
        UsageCounter,
    };
    use clientmon_storage::UsageDelta;
    use tempfile::TempDir;

    #[test]
    fn dry_run_counts_without_deleting() {
        clientmon_common::id::init(1, 1);
        let dir = TempDir::new().unwrap();
        let store = MonitorStore::open(dir.path(), "retention.db").unwrap();
        let client = store.insert_client(&NewClient::new("app", "App")).unwrap();
        let now = Utc::now();
        let old = now - Duration::days(120);

        store
            .insert_client_event(
                &NewClientEvent::new(&client.id, EventType::HealthUp, "old", EventSeverity::Low, "old")
                    .at(old),
            )
            .unwrap();
        store
            .insert_client_event(&NewClientEvent::new(
                &client.id,
                EventType::HealthUp,
                "fresh",
                EventSeverity::Low,
                "fresh",
            ))
            .unwrap();
        let bump = UsageDelta::Increment(UsageCounter::ApiCalls, 1);
        store
            .apply_usage(&client.id, old.date_naive(), &bump, old)
            .unwrap();
        store
            .apply_usage(&client.id, now.date_naive(), &bump, now)
            .unwrap();

        let acked = Notification::pending(
            clientmon_common::id::next_id(),
            NotificationType::Info,
            "old".to_string(),
            "old".to_string(),
            serde_json::json!({}),
            old,
        );
        store.insert_notification(&acked).unwrap();
        store
            .acknowledge_notification(&acked.id, "alice", None, old)
            .unwrap();
        let pending = Notification::pending(
            clientmon_common::id::next_id(),
            NotificationType::Info,
            "still open".to_string(),
            "still open".to_string(),
            serde_json::json!({}),
            old,
        );
        store.insert_notification(&pending).unwrap();

        let dry = cleanup_at(&store, 90, true, now).unwrap();
        assert_eq!(dry.client_events, 1);
        assert_eq!(dry.usage_records, 1);
        assert_eq!(dry.acknowledged_notifications, 1);
        assert_eq!(store.list_client_events(&client.id, 10).unwrap().len(), 2);

        let done = cleanup_at(&store, 90, false, now).unwrap();
        assert_eq!(done.total(), 3);
        assert_eq!(store.list_client_events(&client.id, 10).unwrap().len(), 1);
        assert!(store.get_notification(&acked.id).unwrap().is_none());
        assert!(store.get_notification(&pending.id).unwrap().is_some());
        assert_eq!(cleanup_at(&store, 90, true, now).unwrap().total(), 0);
    }
}
