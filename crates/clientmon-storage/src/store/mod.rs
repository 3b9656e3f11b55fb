use chrono::{DateTime, NaiveDate, Utc};
use clientmon_common::types::{HealthStatus, UsageCounter};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, StorageError};

pub mod alert_rule;
pub mod client;
pub mod event;
pub mod notification;
pub mod usage;
pub mod user;

const CLIENTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    health_check_enabled INTEGER NOT NULL DEFAULT 0,
    health_check_url TEXT,
    health_check_interval_seconds INTEGER NOT NULL DEFAULT 300,
    health_status TEXT NOT NULL DEFAULT 'unknown',
    health_check_failures INTEGER NOT NULL DEFAULT 0,
    last_health_check_at INTEGER,
    last_error_message TEXT,
    maintenance_mode INTEGER NOT NULL DEFAULT 0,
    last_activity_at INTEGER,
    max_concurrent_tokens INTEGER,
    rate_limit_per_minute INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_clients_health_due
    ON clients(health_check_enabled, is_active, last_health_check_at);
";

const USAGE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS usage_records (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    date TEXT NOT NULL,
    authorization_requests INTEGER NOT NULL DEFAULT 0,
    successful_authorizations INTEGER NOT NULL DEFAULT 0,
    failed_authorizations INTEGER NOT NULL DEFAULT 0,
    token_requests INTEGER NOT NULL DEFAULT 0,
    successful_tokens INTEGER NOT NULL DEFAULT 0,
    failed_tokens INTEGER NOT NULL DEFAULT 0,
    api_calls INTEGER NOT NULL DEFAULT 0,
    bytes_transferred INTEGER NOT NULL DEFAULT 0,
    unique_users INTEGER NOT NULL DEFAULT 0,
    peak_concurrent_users INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    average_response_time REAL NOT NULL DEFAULT 0,
    response_time_samples INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (client_id, date)
);
CREATE INDEX IF NOT EXISTS idx_usage_date ON usage_records(date);

CREATE TABLE IF NOT EXISTS usage_unique_users (
    client_id TEXT NOT NULL,
    date TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (client_id, date, user_id)
);
";

const ALERT_RULES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    client_id TEXT,
    trigger_type TEXT NOT NULL,
    conditions_json TEXT NOT NULL DEFAULT '[]',
    channels_json TEXT NOT NULL DEFAULT '[]',
    recipients_json TEXT NOT NULL DEFAULT '[]',
    is_active INTEGER NOT NULL DEFAULT 1,
    cooldown_minutes INTEGER NOT NULL DEFAULT 60,
    last_triggered_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_trigger ON alert_rules(trigger_type, is_active);
";

const NOTIFICATIONS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    client_id TEXT,
    alert_rule_id TEXT,
    notification_type TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    data_json TEXT NOT NULL DEFAULT '{}',
    channels_sent_json TEXT NOT NULL DEFAULT '[]',
    recipients_json TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    sent_at INTEGER,
    acknowledged_at INTEGER,
    acknowledged_by TEXT,
    acknowledgment_note TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_client ON notifications(client_id);
CREATE INDEX IF NOT EXISTS idx_notifications_rule ON notifications(alert_rule_id);

CREATE TABLE IF NOT EXISTS in_app_messages (
    id TEXT PRIMARY KEY,
    notification_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    read_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_in_app_user ON in_app_messages(user_id, read_at);
";

const USERS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT,
    created_at INTEGER NOT NULL
);
";

const CLIENT_EVENTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS client_events (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    user_id TEXT,
    event_type TEXT NOT NULL,
    event_name TEXT NOT NULL,
    description TEXT NOT NULL,
    severity TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    occurred_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_client_events_client ON client_events(client_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_client_events_time ON client_events(occurred_at);
";

/// Health fields written after one probe.
#[derive(Debug, Clone)]
pub struct HealthUpdate {
    pub status: HealthStatus,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A single relative change to a client's usage record for one day.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageDelta {
    /// `counter += amount`
    Increment(UsageCounter, i64),
    /// `peak_concurrent_users = max(peak_concurrent_users, n)`
    ConcurrentUsers(i64),
    /// Folds one sample into the running mean response time.
    ResponseTime(f64),
}

/// Access layer for the monitoring database.
///
/// Every method takes the connection lock for the duration of its
/// statements. Counter updates are relative SQL expressions so that several
/// processes sharing the database file never lose increments.
pub struct MonitorStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl MonitorStore {
    /// Opens (creating if needed) `file_name` under `data_dir` and applies the schema.
    pub fn open(data_dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(file_name);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(CLIENTS_SCHEMA)?;
        conn.execute_batch(USAGE_SCHEMA)?;
        conn.execute_batch(ALERT_RULES_SCHEMA)?;
        conn.execute_batch(NOTIFICATIONS_SCHEMA)?;
        conn.execute_batch(USERS_SCHEMA)?;
        conn.execute_batch(CLIENT_EVENTS_SCHEMA)?;
        tracing::info!(path = %db_path.display(), "Initialized monitor store");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---- Column codecs ----

pub(crate) fn ts_to_db(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn ts_from_db(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn opt_ts_from_db(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

pub(crate) fn date_to_db(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn date_from_db(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StorageError::invalid("date", s))
}

pub(crate) fn parse_column<T: std::str::FromStr>(column: &'static str, s: String) -> Result<T> {
    s.parse().map_err(|_| StorageError::InvalidValue { column, value: s })
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
