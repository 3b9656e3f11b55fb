use chrono::{DateTime, Utc};
use clientmon_common::types::{AlertRule, NewAlertRule, TriggerType, MAX_COOLDOWN_MINUTES};
use rusqlite::{params, OptionalExtension};

use super::{opt_ts_from_db, parse_column, ts_from_db, ts_to_db, MonitorStore};
use crate::error::{Result, StorageError};

const RULE_COLUMNS: &str = "id, name, description, client_id, trigger_type, conditions_json, \
     channels_json, recipients_json, is_active, cooldown_minutes, last_triggered_at, created_at, updated_at";

impl MonitorStore {
    /// Inserts a rule. `cooldown_minutes` must lie in `0..=MAX_COOLDOWN_MINUTES`.
    pub fn insert_alert_rule(&self, new: &NewAlertRule) -> Result<AlertRule> {
        if !(0..=MAX_COOLDOWN_MINUTES).contains(&new.cooldown_minutes) {
            return Err(StorageError::InvalidInput {
                field: "cooldown_minutes",
                reason: format!(
                    "{} is outside 0..={MAX_COOLDOWN_MINUTES}",
                    new.cooldown_minutes
                ),
            });
        }
        let id = clientmon_common::id::next_id();
        let now = ts_to_db(Utc::now());
        let conditions_json = serde_json::to_string(&new.conditions)?;
        let channels_json = serde_json::to_string(&new.notification_channels)?;
        let recipients_json = serde_json::to_string(&new.recipients)?;
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO alert_rules (id, name, description, client_id, trigger_type, conditions_json,
                     channels_json, recipients_json, is_active, cooldown_minutes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id,
                    new.name,
                    new.description,
                    new.client_id,
                    new.trigger_type.as_str(),
                    conditions_json,
                    channels_json,
                    recipients_json,
                    new.is_active,
                    new.cooldown_minutes,
                    now,
                ],
            )?;
        }
        self.get_alert_rule(&id)?
            .ok_or(StorageError::InsertReadback {
                entity: "alert_rule",
            })
    }

    pub fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let conn = self.lock();
        let sql = format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id], |row| Ok(row_to_rule(row)))
            .optional()?;
        row.transpose()
    }

    pub fn get_alert_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        let conn = self.lock();
        let sql = format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE name = ?1");
        let row = conn
            .query_row(&sql, params![name], |row| Ok(row_to_rule(row)))
            .optional()?;
        row.transpose()
    }

    pub fn list_alert_rules(&self) -> Result<Vec<AlertRule>> {
        let conn = self.lock();
        let sql = format!("SELECT {RULE_COLUMNS} FROM alert_rules ORDER BY created_at ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok(row_to_rule(row)))?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row??);
        }
        Ok(rules)
    }

    /// Active rules for `trigger` that apply to `client_id` (unscoped rules
    /// apply to every client).
    pub fn list_active_rules_for_trigger(
        &self,
        trigger: TriggerType,
        client_id: &str,
    ) -> Result<Vec<AlertRule>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules
             WHERE trigger_type = ?1 AND is_active = 1 AND (client_id IS NULL OR client_id = ?2)
             ORDER BY created_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![trigger.as_str(), client_id], |row| {
            Ok(row_to_rule(row))
        })?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row??);
        }
        Ok(rules)
    }

    pub fn set_alert_rule_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE alert_rules SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, ts_to_db(Utc::now()), id],
        )?;
        Ok(changed > 0)
    }

    /// Atomically claims a firing slot for the rule at `now`.
    ///
    /// Succeeds only if the rule is active and its cooldown has elapsed; on
    /// success `last_triggered_at` is set to `now`. Of several concurrent
    /// callers at most one gets `true` per cooldown window.
    pub fn claim_alert_rule(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let now_ms = ts_to_db(now);
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE alert_rules SET last_triggered_at = ?1, updated_at = ?1
             WHERE id = ?2 AND is_active = 1
               AND (last_triggered_at IS NULL OR last_triggered_at + cooldown_minutes * 60000 <= ?1)",
            params![now_ms, id],
        )?;
        Ok(changed == 1)
    }
}

fn row_to_rule(row: &rusqlite::Row) -> Result<AlertRule> {
    let trigger: String = row.get(4)?;
    let conditions_json: String = row.get(5)?;
    let channels_json: String = row.get(6)?;
    let recipients_json: String = row.get(7)?;
    Ok(AlertRule {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        client_id: row.get(3)?,
        trigger_type: parse_column("trigger_type", trigger)?,
        conditions: serde_json::from_str(&conditions_json)?,
        notification_channels: serde_json::from_str(&channels_json)?,
        recipients: serde_json::from_str(&recipients_json)?,
        is_active: row.get(8)?,
        cooldown_minutes: row.get(9)?,
        last_triggered_at: opt_ts_from_db(row.get(10)?),
        created_at: ts_from_db(row.get(11)?),
        updated_at: ts_from_db(row.get(12)?),
    })
}
