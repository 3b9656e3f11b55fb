use chrono::{DateTime, NaiveDate, Utc};
use clientmon_common::types::UsageRecord;
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use super::{
    date_from_db, date_to_db, is_unique_violation, ts_from_db, ts_to_db, MonitorStore, UsageDelta,
};
use crate::error::Result;

const USAGE_COLUMNS: &str = "id, client_id, date, authorization_requests, successful_authorizations, \
     failed_authorizations, token_requests, successful_tokens, failed_tokens, api_calls, \
     bytes_transferred, unique_users, peak_concurrent_users, error_count, average_response_time, \
     created_at, updated_at";

/// Column-level form of a usage change.
enum Change {
    Add(&'static str, i64),
    Peak(i64),
    ResponseTime(f64),
}

impl From<&UsageDelta> for Change {
    fn from(delta: &UsageDelta) -> Self {
        match delta {
            UsageDelta::Increment(counter, amount) => Change::Add(counter.as_str(), *amount),
            UsageDelta::ConcurrentUsers(n) => Change::Peak(*n),
            UsageDelta::ResponseTime(ms) => Change::ResponseTime(*ms),
        }
    }
}

impl MonitorStore {
    /// Applies one relative change to the `(client_id, date)` usage row,
    /// creating the row on first use.
    ///
    /// The UPDATE is tried first; if no row exists an INSERT seeded with the
    /// delta follows. Losing the INSERT race to another writer falls back to
    /// the UPDATE, so concurrent first writers are all counted.
    pub fn apply_usage(
        &self,
        client_id: &str,
        date: NaiveDate,
        delta: &UsageDelta,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.apply_change(client_id, date, &Change::from(delta), now)
    }

    /// Counts `user_id` towards the day's distinct users. Returns whether the
    /// user was new for that day.
    pub fn record_unique_user(
        &self,
        client_id: &str,
        date: NaiveDate,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = {
            let conn = self.lock();
            conn.execute(
                "INSERT OR IGNORE INTO usage_unique_users (client_id, date, user_id) VALUES (?1, ?2, ?3)",
                params![client_id, date_to_db(date), user_id],
            )?
        };
        if inserted == 0 {
            return Ok(false);
        }
        self.apply_change(client_id, date, &Change::Add("unique_users", 1), now)?;
        Ok(true)
    }

    fn apply_change(
        &self,
        client_id: &str,
        date: NaiveDate,
        change: &Change,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let date = date_to_db(date);
        let now = ts_to_db(now);
        let conn = self.lock();
        if update_usage(&conn, client_id, &date, change, now)? > 0 {
            return Ok(());
        }
        match insert_usage(&conn, client_id, &date, change, now) {
            Ok(()) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(client_id, date = %date, "Usage row created concurrently, retrying update");
                update_usage(&conn, client_id, &date, change, now)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_usage_record(&self, client_id: &str, date: NaiveDate) -> Result<Option<UsageRecord>> {
        let conn = self.lock();
        let sql =
            format!("SELECT {USAGE_COLUMNS} FROM usage_records WHERE client_id = ?1 AND date = ?2");
        let row = conn
            .query_row(&sql, params![client_id, date_to_db(date)], |row| {
                Ok(row_to_usage(row))
            })
            .optional()?;
        row.transpose()
    }

    /// Usage rows with `from <= date <= to`, optionally for one client.
    pub fn list_usage_records(
        &self,
        client_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UsageRecord>> {
        let conn = self.lock();
        let mut sql =
            format!("SELECT {USAGE_COLUMNS} FROM usage_records WHERE date >= ?1 AND date <= ?2");
        let mut params: Vec<Box<dyn ToSql>> =
            vec![Box::new(date_to_db(from)), Box::new(date_to_db(to))];
        if let Some(cid) = client_id {
            sql.push_str(" AND client_id = ?3");
            params.push(Box::new(cid.to_string()));
        }
        sql.push_str(" ORDER BY date ASC, client_id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| Ok(row_to_usage(row)))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    pub fn count_usage_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM usage_records WHERE date < ?1",
            params![date_to_db(cutoff)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Deletes usage rows (and their distinct-user sets) dated before `cutoff`.
    pub fn delete_usage_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let cutoff = date_to_db(cutoff);
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM usage_unique_users WHERE date < ?1",
            params![cutoff],
        )?;
        let deleted = tx.execute("DELETE FROM usage_records WHERE date < ?1", params![cutoff])?;
        tx.commit()?;
        Ok(deleted as u64)
    }
}

fn update_usage(
    conn: &Connection,
    client_id: &str,
    date: &str,
    change: &Change,
    now: i64,
) -> rusqlite::Result<usize> {
    match change {
        Change::Add(column, amount) => conn.execute(
            &format!(
                "UPDATE usage_records SET {column} = {column} + ?1, updated_at = ?2
                 WHERE client_id = ?3 AND date = ?4"
            ),
            params![amount, now, client_id, date],
        ),
        Change::Peak(n) => conn.execute(
            "UPDATE usage_records SET peak_concurrent_users = MAX(peak_concurrent_users, ?1), updated_at = ?2
             WHERE client_id = ?3 AND date = ?4",
            params![n, now, client_id, date],
        ),
        Change::ResponseTime(ms) => conn.execute(
            "UPDATE usage_records SET
                 average_response_time =
                     (average_response_time * response_time_samples + ?1) / (response_time_samples + 1),
                 response_time_samples = response_time_samples + 1,
                 updated_at = ?2
             WHERE client_id = ?3 AND date = ?4",
            params![ms, now, client_id, date],
        ),
    }
}

fn insert_usage(
    conn: &Connection,
    client_id: &str,
    date: &str,
    change: &Change,
    now: i64,
) -> rusqlite::Result<()> {
    let id = clientmon_common::id::next_id();
    match change {
        Change::Add(column, amount) => conn.execute(
            &format!(
                "INSERT INTO usage_records (id, client_id, date, {column}, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)"
            ),
            params![id, client_id, date, amount, now],
        )?,
        Change::Peak(n) => conn.execute(
            "INSERT INTO usage_records (id, client_id, date, peak_concurrent_users, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, client_id, date, n, now],
        )?,
        Change::ResponseTime(ms) => conn.execute(
            "INSERT INTO usage_records
                 (id, client_id, date, average_response_time, response_time_samples, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            params![id, client_id, date, ms, now],
        )?,
    };
    Ok(())
}

fn row_to_usage(row: &rusqlite::Row) -> Result<UsageRecord> {
    let date: String = row.get(2)?;
    Ok(UsageRecord {
        id: row.get(0)?,
        client_id: row.get(1)?,
        date: date_from_db(&date)?,
        authorization_requests: row.get(3)?,
        successful_authorizations: row.get(4)?,
        failed_authorizations: row.get(5)?,
        token_requests: row.get(6)?,
        successful_tokens: row.get(7)?,
        failed_tokens: row.get(8)?,
        api_calls: row.get(9)?,
        bytes_transferred: row.get(10)?,
        unique_users: row.get(11)?,
        peak_concurrent_users: row.get(12)?,
        error_count: row.get(13)?,
        average_response_time: row.get(14)?,
        created_at: ts_from_db(row.get(15)?),
        updated_at: ts_from_db(row.get(16)?),
    })
}
