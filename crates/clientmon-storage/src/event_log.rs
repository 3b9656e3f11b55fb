use std::sync::Arc;

use clientmon_common::types::{ClientEvent, EventSeverity, EventType, NewClientEvent};
use serde_json::Value;

use crate::store::MonitorStore;

/// Append-only writer for the client event log.
///
/// Recording is a side effect of other state changes: write failures are
/// logged and swallowed so they never undo the change that caused them.
#[derive(Clone)]
pub struct EventLogger {
    store: Arc<MonitorStore>,
}

impl EventLogger {
    pub fn new(store: Arc<MonitorStore>) -> Self {
        Self { store }
    }

    pub fn record(
        &self,
        client_id: &str,
        event_type: EventType,
        event_name: &str,
        severity: EventSeverity,
        description: impl Into<String>,
        metadata: Value,
    ) -> Option<ClientEvent> {
        self.append(
            NewClientEvent::new(client_id, event_type, event_name, severity, description)
                .with_metadata(metadata),
        )
    }

    /// Writes a fully built event. Returns `None` if the write failed.
    pub fn append(&self, event: NewClientEvent) -> Option<ClientEvent> {
        match self.store.insert_client_event(&event) {
            Ok(written) => {
                tracing::debug!(
                    client_id = %written.client_id,
                    event_type = %written.event_type,
                    severity = %written.severity,
                    "Client event recorded"
                );
                Some(written)
            }
            Err(e) => {
                tracing::error!(
                    client_id = %event.client_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to record client event"
                );
                None
            }
        }
    }
}
