use chrono::{DateTime, Utc};
use clientmon_common::types::{Client, HealthStatus, NewClient};
use rusqlite::{params, OptionalExtension};

use super::{opt_ts_from_db, parse_column, ts_from_db, ts_to_db, HealthUpdate, MonitorStore};
use crate::error::{Result, StorageError};

const CLIENT_COLUMNS: &str = "id, client_id, name, is_active, health_check_enabled, health_check_url, \
     health_check_interval_seconds, health_status, health_check_failures, last_health_check_at, \
     last_error_message, maintenance_mode, last_activity_at, max_concurrent_tokens, \
     rate_limit_per_minute, created_at, updated_at";

impl MonitorStore {
    // ---- clients CRUD ----

    pub fn insert_client(&self, new: &NewClient) -> Result<Client> {
        let id = clientmon_common::id::next_id();
        let now = ts_to_db(Utc::now());
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO clients (id, client_id, name, is_active, health_check_enabled, health_check_url,
                     health_check_interval_seconds, max_concurrent_tokens, rate_limit_per_minute, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id,
                    new.client_id,
                    new.name,
                    new.health_check_enabled,
                    new.health_check_url,
                    new.health_check_interval_seconds,
                    new.max_concurrent_tokens,
                    new.rate_limit_per_minute,
                    now,
                ],
            )?;
        }
        self.get_client(&id)?
            .ok_or(StorageError::InsertReadback { entity: "client" })
    }

    pub fn get_client(&self, id: &str) -> Result<Option<Client>> {
        let conn = self.lock();
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id], |row| Ok(row_to_client(row)))
            .optional()?;
        row.transpose()
    }

    pub fn get_client_by_client_id(&self, client_id: &str) -> Result<Option<Client>> {
        let conn = self.lock();
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = ?1");
        let row = conn
            .query_row(&sql, params![client_id], |row| Ok(row_to_client(row)))
            .optional()?;
        row.transpose()
    }

    pub fn list_clients(&self) -> Result<Vec<Client>> {
        self.query_clients("1 = 1", &[])
    }

    /// Every active client with health checking enabled and a URL, due or not.
    pub fn list_health_check_clients(&self) -> Result<Vec<Client>> {
        self.query_clients(
            "health_check_enabled = 1 AND health_check_url IS NOT NULL AND is_active = 1",
            &[],
        )
    }

    /// Clients whose check interval has elapsed at `now`.
    ///
    /// A client with `last_health_check_at + interval >= now` is never returned.
    pub fn query_clients_due_for_check(&self, now: DateTime<Utc>) -> Result<Vec<Client>> {
        let now_ms = ts_to_db(now);
        self.query_clients(
            "health_check_enabled = 1 AND health_check_url IS NOT NULL AND is_active = 1
             AND (last_health_check_at IS NULL
                  OR last_health_check_at + health_check_interval_seconds * 1000 < ?1)",
            &[&now_ms],
        )
    }

    /// Active clients with no recorded activity since `cutoff`.
    pub fn list_inactive_clients(&self, cutoff: DateTime<Utc>) -> Result<Vec<Client>> {
        let cutoff_ms = ts_to_db(cutoff);
        self.query_clients(
            "is_active = 1 AND COALESCE(last_activity_at, created_at) < ?1",
            &[&cutoff_ms],
        )
    }

    fn query_clients(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<Client>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE {where_clause} ORDER BY created_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| Ok(row_to_client(row)))?;
        let mut clients = Vec::new();
        for row in rows {
            clients.push(row??);
        }
        Ok(clients)
    }

    // ---- health fields ----

    /// Writes the outcome of one probe.
    ///
    /// The consecutive failure counter is reset or incremented inside the
    /// UPDATE itself. Returns the updated client, or `None` if it no longer exists.
    pub fn record_health_result(&self, id: &str, update: &HealthUpdate) -> Result<Option<Client>> {
        let healthy = update.status == HealthStatus::Healthy;
        let error_message = if healthy {
            None
        } else {
            update.error_message.clone()
        };
        let checked_at = ts_to_db(update.checked_at);
        let changed = {
            let conn = self.lock();
            conn.execute(
                "UPDATE clients SET
                     health_status = ?1,
                     health_check_failures = CASE WHEN ?2 THEN 0 ELSE health_check_failures + 1 END,
                     last_health_check_at = ?3,
                     last_error_message = ?4,
                     updated_at = ?3
                 WHERE id = ?5",
                params![update.status.as_str(), healthy, checked_at, error_message, id],
            )?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_client(id)
    }

    #[cfg(test)]
    pub(crate) fn update_last_health_check_at(&self, id: &str, ts: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE clients SET last_health_check_at = ?1 WHERE id = ?2",
            params![ts_to_db(ts), id],
        )?;
        Ok(())
    }

    // ---- activity / administrative fields ----

    pub fn touch_last_activity(&self, id: &str, ts: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE clients SET last_activity_at = MAX(COALESCE(last_activity_at, 0), ?1) WHERE id = ?2",
            params![ts_to_db(ts), id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_maintenance_mode(&self, id: &str, enabled: bool) -> Result<Option<Client>> {
        let changed = {
            let conn = self.lock();
            conn.execute(
                "UPDATE clients SET maintenance_mode = ?1, updated_at = ?2 WHERE id = ?3",
                params![enabled, ts_to_db(Utc::now()), id],
            )?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_client(id)
    }

    pub fn set_client_active(&self, id: &str, active: bool) -> Result<Option<Client>> {
        let changed = {
            let conn = self.lock();
            conn.execute(
                "UPDATE clients SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active, ts_to_db(Utc::now()), id],
            )?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_client(id)
    }
}

fn row_to_client(row: &rusqlite::Row) -> Result<Client> {
    let status: String = row.get(7)?;
    Ok(Client {
        id: row.get(0)?,
        client_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get(3)?,
        health_check_enabled: row.get(4)?,
        health_check_url: row.get(5)?,
        health_check_interval_seconds: row.get(6)?,
        health_status: parse_column("health_status", status)?,
        health_check_failures: row.get(8)?,
        last_health_check_at: opt_ts_from_db(row.get(9)?),
        last_error_message: row.get(10)?,
        maintenance_mode: row.get(11)?,
        last_activity_at: opt_ts_from_db(row.get(12)?),
        max_concurrent_tokens: row.get(13)?,
        rate_limit_per_minute: row.get(14)?,
        created_at: ts_from_db(row.get(15)?),
        updated_at: ts_from_db(row.get(16)?),
    })
}
