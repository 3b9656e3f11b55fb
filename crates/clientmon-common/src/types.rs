use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// variants map one-to-one onto stored string values.
macro_rules! string_enum {
    ($name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!(concat!("unknown ", $what, ": {}"), s)),
                }
            }
        }
    };
}

// ---- Clients ----

/// Last known outcome of a client's health probe.
///
/// ```
/// use clientmon_common::types::HealthStatus;
///
/// let status: HealthStatus = "unhealthy".parse().unwrap();
/// assert_eq!(status, HealthStatus::Unhealthy);
/// assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Error,
}

string_enum!(HealthStatus, "health status" {
    Unknown => "unknown",
    Healthy => "healthy",
    Unhealthy => "unhealthy",
    Error => "error",
});

/// An OAuth client as seen by the monitoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    /// Public OAuth client identifier.
    pub client_id: String,
    pub name: String,
    pub is_active: bool,
    pub health_check_enabled: bool,
    pub health_check_url: Option<String>,
    pub health_check_interval_seconds: i64,
    pub health_status: HealthStatus,
    /// Consecutive failed probes; reset to 0 by a healthy probe.
    pub health_check_failures: i64,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub maintenance_mode: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub max_concurrent_tokens: Option<i64>,
    pub rate_limit_per_minute: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// The URL to probe, or `None` when health checking is switched off.
    pub fn probe_target(&self) -> Option<&str> {
        if !self.health_check_enabled {
            return None;
        }
        self.health_check_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    /// Whether the check interval has elapsed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_health_check_at {
            None => true,
            Some(last) => Duration::try_seconds(self.health_check_interval_seconds)
                .and_then(|interval| last.checked_add_signed(interval))
                .is_some_and(|next| next < now),
        }
    }
}

/// Fields needed to register a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClient {
    pub client_id: String,
    pub name: String,
    #[serde(default)]
    pub health_check_enabled: bool,
    #[serde(default)]
    pub health_check_url: Option<String>,
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: i64,
    #[serde(default)]
    pub max_concurrent_tokens: Option<i64>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<i64>,
}

fn default_health_check_interval_seconds() -> i64 {
    300
}

impl NewClient {
    pub fn new(client_id: &str, name: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            name: name.to_string(),
            health_check_enabled: false,
            health_check_url: None,
            health_check_interval_seconds: default_health_check_interval_seconds(),
            max_concurrent_tokens: None,
            rate_limit_per_minute: None,
        }
    }

    pub fn with_health_check(mut self, url: &str, interval_seconds: i64) -> Self {
        self.health_check_enabled = true;
        self.health_check_url = Some(url.to_string());
        self.health_check_interval_seconds = interval_seconds;
        self
    }
}

// ---- Usage ----

/// One row of per-client, per-day usage counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub client_id: String,
    pub date: NaiveDate,
    pub authorization_requests: i64,
    pub successful_authorizations: i64,
    pub failed_authorizations: i64,
    pub token_requests: i64,
    pub successful_tokens: i64,
    pub failed_tokens: i64,
    pub api_calls: i64,
    pub bytes_transferred: i64,
    pub unique_users: i64,
    pub peak_concurrent_users: i64,
    pub error_count: i64,
    /// Running mean in milliseconds; a gauge, not a counter.
    pub average_response_time: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Failed authorization and token requests as a percentage of all of them.
    /// `None` when there were no requests.
    pub fn error_rate_percent(&self) -> Option<f64> {
        let total = self.authorization_requests + self.token_requests;
        if total == 0 {
            return None;
        }
        let failed = self.failed_authorizations + self.failed_tokens;
        Some(failed as f64 * 100.0 / total as f64)
    }
}

/// A monotonically increasing usage counter column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCounter {
    AuthorizationRequests,
    SuccessfulAuthorizations,
    FailedAuthorizations,
    TokenRequests,
    SuccessfulTokens,
    FailedTokens,
    ApiCalls,
    BytesTransferred,
    ErrorCount,
}

string_enum!(UsageCounter, "usage counter" {
    AuthorizationRequests => "authorization_requests",
    SuccessfulAuthorizations => "successful_authorizations",
    FailedAuthorizations => "failed_authorizations",
    TokenRequests => "token_requests",
    SuccessfulTokens => "successful_tokens",
    FailedTokens => "failed_tokens",
    ApiCalls => "api_calls",
    BytesTransferred => "bytes_transferred",
    ErrorCount => "error_count",
});

// ---- Alert rules ----

/// What kind of observation an alert rule listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    HealthCheckFailure,
    HighErrorRate,
    ResponseTimeThreshold,
    TokenUsageSpike,
    MaintenanceMode,
    SecurityEvent,
    ClientInactive,
}

string_enum!(TriggerType, "trigger type" {
    HealthCheckFailure => "health_check_failure",
    HighErrorRate => "high_error_rate",
    ResponseTimeThreshold => "response_time_threshold",
    TokenUsageSpike => "token_usage_spike",
    MaintenanceMode => "maintenance_mode",
    SecurityEvent => "security_event",
    ClientInactive => "client_inactive",
});

/// Comparison applied between an observed metric and a rule threshold.
///
/// ```
/// use clientmon_common::types::CompareOp;
///
/// let op: CompareOp = "gte".parse().unwrap();
/// assert!(op.check(3.0, 3.0));
/// assert_eq!(op.to_string(), "greater_equal");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "lt")]
    LessThan,
    #[serde(alias = "gte")]
    GreaterEqual,
    #[serde(alias = "lte")]
    LessEqual,
    #[serde(alias = "eq")]
    Equal,
    #[serde(alias = "ne")]
    NotEqual,
}

impl std::str::FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" => Ok(Self::GreaterThan),
            "less_than" | "lt" => Ok(Self::LessThan),
            "greater_equal" | "gte" => Ok(Self::GreaterEqual),
            "less_equal" | "lte" => Ok(Self::LessEqual),
            "equal" | "eq" => Ok(Self::Equal),
            "not_equal" | "ne" => Ok(Self::NotEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "greater_than"),
            Self::LessThan => write!(f, "less_than"),
            Self::GreaterEqual => write!(f, "greater_equal"),
            Self::LessEqual => write!(f, "less_equal"),
            Self::Equal => write!(f, "equal"),
            Self::NotEqual => write!(f, "not_equal"),
        }
    }
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() < f64::EPSILON,
            Self::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// A single `metric <operator> threshold` predicate of an alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: String,
    pub operator: CompareOp,
    pub threshold: f64,
}

impl Condition {
    pub fn new(metric: &str, operator: CompareOp, threshold: f64) -> Self {
        Self {
            metric: metric.to_string(),
            operator,
            threshold,
        }
    }
}

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Slack,
    InApp,
    Webhook,
}

string_enum!(ChannelKind, "channel" {
    Email => "email",
    Slack => "slack",
    InApp => "in_app",
    Webhook => "webhook",
});

/// A configurable alert rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Restricts the rule to one client; `None` applies to every client.
    pub client_id: Option<String>,
    pub trigger_type: TriggerType,
    /// All conditions must hold for the rule to fire.
    pub conditions: Vec<Condition>,
    pub notification_channels: BTreeSet<ChannelKind>,
    pub recipients: Vec<String>,
    pub is_active: bool,
    pub cooldown_minutes: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// End of the current cooldown, if the rule has ever fired. A cooldown
    /// too long to represent ends at `DateTime::<Utc>::MAX_UTC`.
    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.last_triggered_at.map(|last| {
            Duration::try_minutes(self.cooldown_minutes.max(0))
                .and_then(|cooldown| last.checked_add_signed(cooldown))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until().is_some_and(|until| now < until)
    }

}

/// Fields needed to create an alert rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub notification_channels: BTreeSet<ChannelKind>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_rule_active")]
    pub is_active: bool,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

fn default_rule_active() -> bool {
    true
}

/// Longest accepted cooldown: one year.
pub const MAX_COOLDOWN_MINUTES: i64 = 525_600;

fn default_cooldown_minutes() -> i64 {
    60
}

// ---- Notifications ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Info,
    Warning,
    Alert,
    Critical,
}

string_enum!(NotificationType, "notification type" {
    Info => "info",
    Warning => "warning",
    Alert => "alert",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Acknowledged,
}

string_enum!(NotificationStatus, "notification status" {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
    Acknowledged => "acknowledged",
});

/// A notification produced by an alert rule (or raised directly).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub client_id: Option<String>,
    pub alert_rule_id: Option<String>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub channels_sent: BTreeSet<ChannelKind>,
    pub recipients: Vec<String>,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub acknowledgment_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// A fresh `pending` notification.
    pub fn pending(
        id: String,
        notification_type: NotificationType,
        title: String,
        message: String,
        data: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client_id: None,
            alert_rule_id: None,
            notification_type,
            title,
            message,
            data,
            channels_sent: BTreeSet::new(),
            recipients: Vec::new(),
            status: NotificationStatus::Pending,
            sent_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledgment_note: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A per-user in-app inbox entry created by the in-app channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppMessage {
    pub id: String,
    pub notification_id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A console user that can receive notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---- Client events ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(EventSeverity, "event severity" {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    HealthUp,
    HealthDown,
    ErrorOccurred,
    AlertTriggered,
    NotificationSent,
    NotificationFailed,
    MaintenanceEnabled,
    MaintenanceDisabled,
}

string_enum!(EventType, "event type" {
    HealthUp => "HEALTH_UP",
    HealthDown => "HEALTH_DOWN",
    ErrorOccurred => "ERROR_OCCURRED",
    AlertTriggered => "ALERT_TRIGGERED",
    NotificationSent => "NOTIFICATION_SENT",
    NotificationFailed => "NOTIFICATION_FAILED",
    MaintenanceEnabled => "MAINTENANCE_ENABLED",
    MaintenanceDisabled => "MAINTENANCE_DISABLED",
});

/// An immutable entry in a client's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEvent {
    pub id: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub event_type: EventType,
    pub event_name: String,
    pub description: String,
    pub severity: EventSeverity,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}

/// A client event before it is written.
#[derive(Debug, Clone)]
pub struct NewClientEvent {
    pub client_id: String,
    pub user_id: Option<String>,
    pub event_type: EventType,
    pub event_name: String,
    pub description: String,
    pub severity: EventSeverity,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}

impl NewClientEvent {
    pub fn new(
        client_id: &str,
        event_type: EventType,
        event_name: &str,
        severity: EventSeverity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            user_id: None,
            event_type,
            event_name: event_name.to_string(),
            description: description.into(),
            severity,
            ip_address: None,
            user_agent: None,
            metadata: Value::Object(Default::default()),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(interval: i64, last: Option<DateTime<Utc>>) -> Client {
        let now = Utc::now();
        Client {
            id: "1".into(),
            client_id: "web-app".into(),
            name: "Web App".into(),
            is_active: true,
            health_check_enabled: true,
            health_check_url: Some("https://example.com/health".into()),
            health_check_interval_seconds: interval,
            health_status: HealthStatus::Unknown,
            health_check_failures: 0,
            last_health_check_at: last,
            last_error_message: None,
            maintenance_mode: false,
            last_activity_at: None,
            max_concurrent_tokens: None,
            rate_limit_per_minute: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn due_when_interval_elapsed() {
        let now = Utc::now();
        assert!(client(300, None).is_due(now));
        assert!(client(300, Some(now - Duration::seconds(400))).is_due(now));
        assert!(!client(300, Some(now - Duration::seconds(300))).is_due(now));
        assert!(!client(300, Some(now - Duration::seconds(10))).is_due(now));
    }

    #[test]
    fn probe_target_requires_enabled_and_url() {
        let mut c = client(300, None);
        assert_eq!(c.probe_target(), Some("https://example.com/health"));
        c.health_check_url = Some("  ".into());
        assert_eq!(c.probe_target(), None);
        c.health_check_url = Some("https://example.com/health".into());
        c.health_check_enabled = false;
        assert_eq!(c.probe_target(), None);
    }

    #[test]
    fn error_rate_percent() {
        let now = Utc::now();
        let mut rec = UsageRecord {
            id: "1".into(),
            client_id: "c".into(),
            date: now.date_naive(),
            authorization_requests: 0,
            successful_authorizations: 0,
            failed_authorizations: 0,
            token_requests: 0,
            successful_tokens: 0,
            failed_tokens: 0,
            api_calls: 0,
            bytes_transferred: 0,
            unique_users: 0,
            peak_concurrent_users: 0,
            error_count: 0,
            average_response_time: 0.0,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(rec.error_rate_percent(), None);
        rec.authorization_requests = 30;
        rec.token_requests = 10;
        rec.failed_authorizations = 6;
        rec.failed_tokens = 4;
        assert_eq!(rec.error_rate_percent(), Some(25.0));
    }

    #[test]
    fn enums_round_trip_through_strings() {
        assert_eq!("in_app".parse::<ChannelKind>(), Ok(ChannelKind::InApp));
        assert_eq!(EventType::HealthDown.to_string(), "HEALTH_DOWN");
        assert_eq!(
            "token_usage_spike".parse::<TriggerType>(),
            Ok(TriggerType::TokenUsageSpike)
        );
        assert!("sometimes".parse::<NotificationStatus>().is_err());
        let json = serde_json::to_string(&ChannelKind::InApp).unwrap();
        assert_eq!(json, "\"in_app\"");
    }

    #[test]
    fn cooldown_window() {
        let now = Utc::now();
        let rule = AlertRule {
            id: "r".into(),
            name: "r".into(),
            description: None,
            client_id: None,
            trigger_type: TriggerType::HealthCheckFailure,
            conditions: vec![],
            notification_channels: BTreeSet::new(),
            recipients: vec![],
            is_active: true,
            cooldown_minutes: 60,
            last_triggered_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        assert!(rule.in_cooldown(now + Duration::minutes(59)));
        assert!(!rule.in_cooldown(now + Duration::minutes(60)));

        let unbounded = AlertRule {
            cooldown_minutes: 10_000_000_000_000,
            ..rule
        };
        assert_eq!(unbounded.cooldown_until(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(unbounded.in_cooldown(now + Duration::days(365)));
    }

    #[test]
    fn oversized_interval_is_never_due() {
        let now = Utc::now();
        assert!(!client(i64::MAX, Some(now - Duration::days(1))).is_due(now));
    }
}
