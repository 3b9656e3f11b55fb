use std::sync::Arc;

use anyhow::{Context, Result};
use clientmon_alert::AlertRuleEngine;
use clientmon_common::types::{Client, EventSeverity, EventType, Notification, TriggerType};
use clientmon_storage::{EventLogger, MonitorStore};
use serde_json::json;

/// Switches a client's maintenance mode and announces the change.
pub struct MaintenanceToggle {
    store: Arc<MonitorStore>,
    engine: Arc<AlertRuleEngine>,
    events: EventLogger,
}

impl MaintenanceToggle {
    pub fn new(store: Arc<MonitorStore>, engine: Arc<AlertRuleEngine>) -> Self {
        Self {
            events: EventLogger::new(store.clone()),
            store,
            engine,
        }
    }

    /// Sets maintenance mode on `client_id`. A call that does not change the
    /// flag is a no-op and returns no notifications.
    pub async fn set(
        &self,
        client_id: &str,
        enabled: bool,
        reason: Option<&str>,
    ) -> Result<(Client, Vec<Notification>)> {
        let current = self
            .store
            .get_client(client_id)?
            .with_context(|| format!("client not found: {client_id}"))?;
        if current.maintenance_mode == enabled {
            return Ok((current, Vec::new()));
        }

        let client = self
            .store
            .set_maintenance_mode(client_id, enabled)?
            .with_context(|| format!("client not found: {client_id}"))?;

        let (event_type, event_name, verb) = if enabled {
            (EventType::MaintenanceEnabled, "maintenance_enabled", "entered")
        } else {
            (EventType::MaintenanceDisabled, "maintenance_disabled", "left")
        };
        let description = match reason {
            Some(reason) => format!("{} {verb} maintenance mode: {reason}", client.name),
            None => format!("{} {verb} maintenance mode", client.name),
        };
        self.events.record(
            &client.id,
            event_type,
            event_name,
            EventSeverity::Medium,
            description,
            json!({ "reason": reason }),
        );
        tracing::info!(client_id = %client.id, enabled, reason = ?reason, "Maintenance mode changed");

        let data = json!({ "entering": enabled, "reason": reason });
        let fired = self
            .engine
            .evaluate_and_trigger(&client, TriggerType::MaintenanceMode, &data)
            .await;
        Ok((client, fired))
    }
}
