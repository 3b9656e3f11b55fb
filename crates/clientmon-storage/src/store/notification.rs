use chrono::{DateTime, Utc};
use clientmon_common::types::{InAppMessage, Notification, NotificationStatus};
use rusqlite::{params, OptionalExtension, ToSql};

use super::{opt_ts_from_db, parse_column, ts_from_db, ts_to_db, MonitorStore};
use crate::error::{Result, StorageError};

const NOTIFICATION_COLUMNS: &str = "id, client_id, alert_rule_id, notification_type, title, message, \
     data_json, channels_sent_json, recipients_json, status, sent_at, acknowledged_at, \
     acknowledged_by, acknowledgment_note, created_at, updated_at";

/// Outcome of acknowledging a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The notification moved to `acknowledged` now.
    Acknowledged,
    /// It had been acknowledged before; nothing was changed.
    AlreadyAcknowledged,
}

/// Filter for [`MonitorStore::list_notifications`].
#[derive(Debug, Clone, Default)]
pub struct NotificationQuery<'a> {
    pub client_id: Option<&'a str>,
    pub alert_rule_id: Option<&'a str>,
    pub status: Option<NotificationStatus>,
    pub limit: Option<usize>,
}

impl MonitorStore {
    pub fn insert_notification(&self, n: &Notification) -> Result<()> {
        let data_json = serde_json::to_string(&n.data)?;
        let channels_json = serde_json::to_string(&n.channels_sent)?;
        let recipients_json = serde_json::to_string(&n.recipients)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO notifications (id, client_id, alert_rule_id, notification_type, title, message,
                 data_json, channels_sent_json, recipients_json, status, sent_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                n.id,
                n.client_id,
                n.alert_rule_id,
                n.notification_type.as_str(),
                n.title,
                n.message,
                data_json,
                channels_json,
                recipients_json,
                n.status.as_str(),
                n.sent_at.map(ts_to_db),
                ts_to_db(n.created_at),
                ts_to_db(n.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        let conn = self.lock();
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id], |row| Ok(row_to_notification(row)))
            .optional()?;
        row.transpose()
    }

    /// Persists the delivery outcome (status, sent_at, channels and recipients).
    pub fn finalize_notification(&self, n: &Notification) -> Result<()> {
        let channels_json = serde_json::to_string(&n.channels_sent)?;
        let recipients_json = serde_json::to_string(&n.recipients)?;
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE notifications SET status = ?1, sent_at = ?2, channels_sent_json = ?3,
                 recipients_json = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                n.status.as_str(),
                n.sent_at.map(ts_to_db),
                channels_json,
                recipients_json,
                ts_to_db(n.updated_at),
                n.id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "notification",
                id: n.id.clone(),
            });
        }
        Ok(())
    }

    pub fn list_notifications(&self, query: &NotificationQuery<'_>) -> Result<Vec<Notification>> {
        let conn = self.lock();
        let mut sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE 1 = 1");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(cid) = query.client_id {
            params.push(Box::new(cid.to_string()));
            sql.push_str(&format!(" AND client_id = ?{}", params.len()));
        }
        if let Some(rid) = query.alert_rule_id {
            params.push(Box::new(rid.to_string()));
            sql.push_str(&format!(" AND alert_rule_id = ?{}", params.len()));
        }
        if let Some(status) = query.status {
            params.push(Box::new(status.as_str()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = query.limit {
            params.push(Box::new(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| Ok(row_to_notification(row)))?;
        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row??);
        }
        Ok(notifications)
    }

    /// Marks a notification acknowledged.
    ///
    /// Acknowledging twice is a no-op that leaves the first acknowledgment
    /// untouched. An unknown id is a [`StorageError::NotFound`].
    pub fn acknowledge_notification(
        &self,
        id: &str,
        acknowledged_by: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Acknowledgement> {
        let now_ms = ts_to_db(now);
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE notifications SET status = 'acknowledged', acknowledged_at = ?1,
                 acknowledged_by = ?2, acknowledgment_note = ?3, updated_at = ?1
             WHERE id = ?4 AND status != 'acknowledged'",
            params![now_ms, acknowledged_by, note, id],
        )?;
        if changed == 1 {
            return Ok(Acknowledgement::Acknowledged);
        }
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM notifications WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(Acknowledgement::AlreadyAcknowledged),
            None => Err(StorageError::NotFound {
                entity: "notification",
                id: id.to_string(),
            }),
        }
    }

    pub fn count_acknowledged_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE status = 'acknowledged' AND created_at < ?1",
            params![ts_to_db(cutoff)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Deletes acknowledged notifications created before `cutoff`, along with
    /// their in-app inbox entries.
    pub fn delete_acknowledged_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff_ms = ts_to_db(cutoff);
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM in_app_messages WHERE notification_id IN (
                 SELECT id FROM notifications WHERE status = 'acknowledged' AND created_at < ?1)",
            params![cutoff_ms],
        )?;
        let deleted = tx.execute(
            "DELETE FROM notifications WHERE status = 'acknowledged' AND created_at < ?1",
            params![cutoff_ms],
        )?;
        tx.commit()?;
        Ok(deleted as u64)
    }

    // ---- in-app inbox ----

    pub fn insert_in_app_message(&self, msg: &InAppMessage) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO in_app_messages (id, notification_id, user_id, title, message, read_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                msg.id,
                msg.notification_id,
                msg.user_id,
                msg.title,
                msg.message,
                msg.read_at.map(ts_to_db),
                ts_to_db(msg.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_in_app_messages(&self, user_id: &str, unread_only: bool) -> Result<Vec<InAppMessage>> {
        let conn = self.lock();
        let sql = if unread_only {
            "SELECT id, notification_id, user_id, title, message, read_at, created_at
             FROM in_app_messages WHERE user_id = ?1 AND read_at IS NULL ORDER BY created_at DESC"
        } else {
            "SELECT id, notification_id, user_id, title, message, read_at, created_at
             FROM in_app_messages WHERE user_id = ?1 ORDER BY created_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(InAppMessage {
                id: row.get(0)?,
                notification_id: row.get(1)?,
                user_id: row.get(2)?,
                title: row.get(3)?,
                message: row.get(4)?,
                read_at: opt_ts_from_db(row.get(5)?),
                created_at: ts_from_db(row.get(6)?),
            })
        })?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Marks an inbox entry read. Returns `false` if it was already read or
    /// does not belong to `user_id`.
    pub fn mark_in_app_read(&self, id: &str, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE in_app_messages SET read_at = ?1 WHERE id = ?2 AND user_id = ?3 AND read_at IS NULL",
            params![ts_to_db(now), id, user_id],
        )?;
        Ok(changed > 0)
    }
}

fn row_to_notification(row: &rusqlite::Row) -> Result<Notification> {
    let notification_type: String = row.get(3)?;
    let data_json: String = row.get(6)?;
    let channels_json: String = row.get(7)?;
    let recipients_json: String = row.get(8)?;
    let status: String = row.get(9)?;
    Ok(Notification {
        id: row.get(0)?,
        client_id: row.get(1)?,
        alert_rule_id: row.get(2)?,
        notification_type: parse_column("notification_type", notification_type)?,
        title: row.get(4)?,
        message: row.get(5)?,
        data: serde_json::from_str(&data_json)?,
        channels_sent: serde_json::from_str(&channels_json)?,
        recipients: serde_json::from_str(&recipients_json)?,
        status: parse_column("status", status)?,
        sent_at: opt_ts_from_db(row.get(10)?),
        acknowledged_at: opt_ts_from_db(row.get(11)?),
        acknowledged_by: row.get(12)?,
        acknowledgment_note: row.get(13)?,
        created_at: ts_from_db(row.get(14)?),
        updated_at: ts_from_db(row.get(15)?),
    })
}
