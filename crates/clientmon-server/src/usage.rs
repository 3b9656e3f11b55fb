use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clientmon_common::types::UsageCounter;
use clientmon_storage::{MonitorStore, Result, UsageDelta};
use serde_json::Value;

/// Usage event names accepted by [`UsageRecorder::record_usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageEventKind {
    AuthorizationRequest,
    AuthorizationSuccess,
    AuthorizationFailure,
    TokenRequest,
    TokenSuccess,
    TokenFailure,
    ApiCall,
    /// Payload `bytes`.
    BytesTransferred,
    Error,
    /// Payload `user_id`.
    UserSeen,
    /// Payload `count`.
    ConcurrentUsers,
    /// Payload `response_time_ms`.
    ResponseTime,
}

impl FromStr for UsageEventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "authorization_request" => Ok(Self::AuthorizationRequest),
            "authorization_success" => Ok(Self::AuthorizationSuccess),
            "authorization_failure" => Ok(Self::AuthorizationFailure),
            "token_request" => Ok(Self::TokenRequest),
            "token_success" => Ok(Self::TokenSuccess),
            "token_failure" => Ok(Self::TokenFailure),
            "api_call" => Ok(Self::ApiCall),
            "bytes_transferred" => Ok(Self::BytesTransferred),
            "error" => Ok(Self::Error),
            "user_seen" => Ok(Self::UserSeen),
            "concurrent_users" => Ok(Self::ConcurrentUsers),
            "response_time" => Ok(Self::ResponseTime),
            _ => Err(format!("unknown usage event: {s}")),
        }
    }
}

/// What one usage event does to the day's record.
#[derive(Debug, Clone, PartialEq)]
enum UsageChange {
    Delta(UsageDelta),
    UniqueUser(String),
}

impl UsageEventKind {
    /// The change this event applies, or `None` when the payload lacks the
    /// value the event needs.
    fn change(self, payload: &Value) -> Option<UsageChange> {
        let bump = |counter| Some(UsageChange::Delta(UsageDelta::Increment(counter, 1)));
        match self {
            Self::AuthorizationRequest => bump(UsageCounter::AuthorizationRequests),
            Self::AuthorizationSuccess => bump(UsageCounter::SuccessfulAuthorizations),
            Self::AuthorizationFailure => bump(UsageCounter::FailedAuthorizations),
            Self::TokenRequest => bump(UsageCounter::TokenRequests),
            Self::TokenSuccess => bump(UsageCounter::SuccessfulTokens),
            Self::TokenFailure => bump(UsageCounter::FailedTokens),
            Self::ApiCall => bump(UsageCounter::ApiCalls),
            Self::Error => bump(UsageCounter::ErrorCount),
            Self::BytesTransferred => payload
                .get("bytes")
                .and_then(Value::as_i64)
                .filter(|bytes| *bytes > 0)
                .map(|bytes| {
                    UsageChange::Delta(UsageDelta::Increment(UsageCounter::BytesTransferred, bytes))
                }),
            Self::UserSeen => payload
                .get("user_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(|id| UsageChange::UniqueUser(id.to_string())),
            Self::ConcurrentUsers => payload
                .get("count")
                .and_then(Value::as_i64)
                .filter(|n| *n >= 0)
                .map(|n| UsageChange::Delta(UsageDelta::ConcurrentUsers(n))),
            Self::ResponseTime => payload
                .get("response_time_ms")
                .and_then(Value::as_f64)
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map(|ms| UsageChange::Delta(UsageDelta::ResponseTime(ms))),
        }
    }
}

/// Folds client usage events into per-day counters.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<MonitorStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<MonitorStore>) -> Self {
        Self { store }
    }

    pub fn record_usage(&self, client_id: &str, event_type: &str, payload: &Value) -> Result<bool> {
        self.record_usage_at(client_id, event_type, payload, Utc::now())
    }

    /// Applies one usage event to the client's record for the day of `now`.
    ///
    /// Returns whether the event was applied. Unknown event types and payloads
    /// missing their value are ignored. Applied events also move the client's
    /// `last_activity_at` forward.
    pub fn record_usage_at(
        &self,
        client_id: &str,
        event_type: &str,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Ok(kind) = event_type.parse::<UsageEventKind>() else {
            tracing::debug!(client_id, event_type, "Ignoring unknown usage event");
            return Ok(false);
        };
        let Some(change) = kind.change(payload) else {
            tracing::debug!(client_id, event_type, "Usage event payload has no usable value");
            return Ok(false);
        };

        let date = now.date_naive();
        match change {
            UsageChange::Delta(delta) => self.store.apply_usage(client_id, date, &delta, now)?,
            UsageChange::UniqueUser(user_id) => {
                // A repeat visit leaves the counter alone but is still activity.
                self.store.record_unique_user(client_id, date, &user_id, now)?;
            }
        }
        self.store.touch_last_activity(client_id, now)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clientmon_common::types::NewClient;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MonitorStore>, String) {
        clientmon_common::id::init(1, 1);
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MonitorStore::open(dir.path(), "usage.db").unwrap());
        let client = store.insert_client(&NewClient::new("app", "App")).unwrap();
        (dir, store, client.id)
    }

    #[test]
    fn event_types_map_to_one_counter() {
        let (_dir, store, id) = setup();
        let recorder = UsageRecorder::new(store.clone());
        let now = Utc::now();

        for event in ["token_request", "token_request", "token_failure", "api_call"] {
            assert!(recorder.record_usage_at(&id, event, &json!({}), now).unwrap());
        }
        recorder
            .record_usage_at(&id, "bytes_transferred", &json!({"bytes": 2048}), now)
            .unwrap();

        let record = store.get_usage_record(&id, now.date_naive()).unwrap().unwrap();
        assert_eq!(record.token_requests, 2);
        assert_eq!(record.failed_tokens, 1);
        assert_eq!(record.api_calls, 1);
        assert_eq!(record.bytes_transferred, 2048);
        assert_eq!(record.successful_tokens, 0);
        assert_eq!(record.authorization_requests, 0);
    }

    #[test]
    fn unknown_events_and_empty_payloads_are_ignored() {
        let (_dir, store, id) = setup();
        let recorder = UsageRecorder::new(store.clone());
        let now = Utc::now();

        assert!(!recorder.record_usage_at(&id, "password_reset", &json!({}), now).unwrap());
        assert!(!recorder
            .record_usage_at(&id, "bytes_transferred", &json!({"size": 10}), now)
            .unwrap());
        assert!(store.get_usage_record(&id, now.date_naive()).unwrap().is_none());
        assert!(store.get_client(&id).unwrap().unwrap().last_activity_at.is_none());
    }

    #[test]
    fn activity_timestamp_follows_usage() {
        let (_dir, store, id) = setup();
        let recorder = UsageRecorder::new(store.clone());
        let now = Utc::now();

        recorder
            .record_usage_at(&id, "user_seen", &json!({"user_id": "u-1"}), now)
            .unwrap();
        recorder
            .record_usage_at(&id, "user_seen", &json!({"user_id": "u-1"}), now)
            .unwrap();
        recorder
            .record_usage_at(&id, "concurrent_users", &json!({"count": 7}), now)
            .unwrap();

        let record = store.get_usage_record(&id, now.date_naive()).unwrap().unwrap();
        assert_eq!(record.unique_users, 1);
        assert_eq!(record.peak_concurrent_users, 7);
        let client = store.get_client(&id).unwrap().unwrap();
        assert_eq!(
            client.last_activity_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }

    #[test]
    fn concurrent_recorders_lose_no_increments() {
        let (_dir, store, id) = setup();
        let recorder = UsageRecorder::new(store.clone());
        let now = Utc::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let recorder = recorder.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..30 {
                        recorder
                            .record_usage_at(&id, "authorization_request", &json!({}), now)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = store.get_usage_record(&id, now.date_naive()).unwrap().unwrap();
        assert_eq!(record.authorization_requests, 120);
    }
}
