use chrono::{DateTime, Utc};
use clientmon_common::types::{ClientEvent, NewClientEvent};
use rusqlite::params;

use super::{parse_column, ts_from_db, ts_to_db, MonitorStore};
use crate::error::Result;

impl MonitorStore {
    /// Appends an event to the log. Events are never updated afterwards.
    pub fn insert_client_event(&self, new: &NewClientEvent) -> Result<ClientEvent> {
        let id = clientmon_common::id::next_id();
        let metadata_json = serde_json::to_string(&new.metadata)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO client_events (id, client_id, user_id, event_type, event_name, description,
                 severity, ip_address, user_agent, metadata_json, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                new.client_id,
                new.user_id,
                new.event_type.as_str(),
                new.event_name,
                new.description,
                new.severity.as_str(),
                new.ip_address,
                new.user_agent,
                metadata_json,
                ts_to_db(new.occurred_at),
            ],
        )?;
        Ok(ClientEvent {
            id,
            client_id: new.client_id.clone(),
            user_id: new.user_id.clone(),
            event_type: new.event_type,
            event_name: new.event_name.clone(),
            description: new.description.clone(),
            severity: new.severity,
            ip_address: new.ip_address.clone(),
            user_agent: new.user_agent.clone(),
            metadata: new.metadata.clone(),
            occurred_at: new.occurred_at,
        })
    }

    /// Most recent events for a client, newest first.
    pub fn list_client_events(&self, client_id: &str, limit: usize) -> Result<Vec<ClientEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, client_id, user_id, event_type, event_name, description, severity,
                    ip_address, user_agent, metadata_json, occurred_at
             FROM client_events WHERE client_id = ?1
             ORDER BY occurred_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![client_id, limit as i64], |row| Ok(row_to_event(row)))?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row??);
        }
        Ok(events)
    }

    pub fn count_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM client_events WHERE occurred_at < ?1",
            params![ts_to_db(cutoff)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM client_events WHERE occurred_at < ?1",
            params![ts_to_db(cutoff)],
        )?;
        Ok(deleted as u64)
    }
}

fn row_to_event(row: &rusqlite::Row) -> Result<ClientEvent> {
    let event_type: String = row.get(3)?;
    let severity: String = row.get(6)?;
    let metadata_json: String = row.get(9)?;
    Ok(ClientEvent {
        id: row.get(0)?,
        client_id: row.get(1)?,
        user_id: row.get(2)?,
        event_type: parse_column("event_type", event_type)?,
        event_name: row.get(4)?,
        description: row.get(5)?,
        severity: parse_column("severity", severity)?,
        ip_address: row.get(7)?,
        user_agent: row.get(8)?,
        metadata: serde_json::from_str(&metadata_json)?,
        occurred_at: ts_from_db(row.get(10)?),
    })
}
